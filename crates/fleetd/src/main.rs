//! fleetd: the fleet canary releaser daemon.
//!
//! Every node in the fleet runs one `fleetd`. The nodes coordinate through
//! a shared Redis instance:
//! - canary loop: the first node to see a new release trials it
//! - rollout loop: once promoted, the rest follow one node per window
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleet-canary.toml
//! fleetd run --once --repo acme/widget --deploy-command ./deploy.sh ...
//! ```

mod daemon;
mod settings;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

use fleet_core::{FleetConfig, LogFormat};

use crate::daemon::Daemon;
use crate::settings::Overrides;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet canary releaser daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the canary and rollout loops on this node.
    Run {
        /// Config file; defaults to `~/fleet-canary.toml`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run one canary cycle and one rollout cycle, then exit.
        #[arg(long)]
        once: bool,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            once,
            overrides,
        } => {
            let loaded = settings::load(config.as_deref(), &overrides)?;
            init_tracing(&loaded.config)?;
            if loaded.from_file {
                info!(path = %loaded.path.display(), "config loaded");
            } else {
                warn!(path = %loaded.path.display(), "config file not found, using defaults and flags");
            }

            let member = match &loaded.config.member_name {
                Some(name) => name.clone(),
                None => hostname()?,
            };
            let span = info_span!("fleetd", member = %member, repo = %loaded.config.repo);
            run(loaded.config, member, once).instrument(span).await
        }
    }
}

async fn run(config: FleetConfig, member: String, once: bool) -> anyhow::Result<()> {
    let daemon = Daemon::assemble(&config, &member).await?;
    if once {
        return daemon.run_once().await;
    }
    daemon.run(shutdown_signal()).await
}

fn init_tracing(config: &FleetConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow!("invalid log level {:?}: {e}", config.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn hostname() -> anyhow::Result<String> {
    let name = gethostname::gethostname()
        .into_string()
        .map_err(|raw| anyhow!("host name {raw:?} is not valid UTF-8; set member_name"))?;
    if name.is_empty() {
        return Err(anyhow!("host name is empty; set member_name"));
    }
    Ok(name)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
