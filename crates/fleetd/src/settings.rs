//! Config file loading and command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use fleet_core::{FleetConfig, LogFormat, parse_duration};

pub const DEFAULT_CONFIG: &str = "~/fleet-canary.toml";

/// Flags that override individual config file keys.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Repository to track, `owner/name`.
    #[arg(long)]
    pub repo: Option<String>,

    #[arg(long, env = "FLEET_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// API endpoint (GitHub Enterprise).
    #[arg(long)]
    pub github_api: Option<String>,

    #[arg(long)]
    pub save_assets_path: Option<PathBuf>,

    /// Regex selecting the release asset.
    #[arg(long)]
    pub package_name_pattern: Option<String>,

    /// Consider pre-releases newer than the latest release.
    #[arg(long)]
    pub include_prerelease: bool,

    #[arg(long)]
    pub deploy_command: Option<String>,

    #[arg(long)]
    pub rollback_command: Option<String>,

    #[arg(long)]
    pub healthcheck_command: Option<String>,

    #[arg(long)]
    pub version_command: Option<String>,

    #[arg(long, value_parser = duration_arg)]
    pub healthcheck_interval: Option<Duration>,

    #[arg(long)]
    pub healthcheck_retries: Option<u32>,

    #[arg(long, value_parser = duration_arg)]
    pub healthcheck_timeout: Option<Duration>,

    #[arg(long, value_parser = duration_arg)]
    pub canary_rollout_window: Option<Duration>,

    #[arg(long, value_parser = duration_arg)]
    pub rollout_window: Option<Duration>,

    #[arg(long, value_parser = duration_arg)]
    pub repository_polling_interval: Option<Duration>,

    /// debug, info, warn or error.
    #[arg(long)]
    pub log_level: Option<String>,

    /// json or text.
    #[arg(long, value_parser = log_format_arg)]
    pub log_format: Option<LogFormat>,

    /// Member identity; defaults to the host name.
    #[arg(long)]
    pub member_name: Option<String>,

    #[arg(long)]
    pub redis_host: Option<String>,

    #[arg(long)]
    pub redis_port: Option<u16>,

    #[arg(long, env = "FLEET_REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    #[arg(long)]
    pub redis_db: Option<i64>,

    #[arg(long)]
    pub redis_key_prefix: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut FleetConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut config.repo, &self.repo);
        set_opt(&mut config.github_token, &self.github_token);
        set(&mut config.github_api, &self.github_api);
        set(&mut config.save_assets_path, &self.save_assets_path);
        set(&mut config.package_name_pattern, &self.package_name_pattern);
        if self.include_prerelease {
            config.include_prerelease = true;
        }
        set(&mut config.deploy_command, &self.deploy_command);
        set_opt(&mut config.rollback_command, &self.rollback_command);
        set(&mut config.healthcheck_command, &self.healthcheck_command);
        set(&mut config.version_command, &self.version_command);
        set(&mut config.healthcheck_interval, &self.healthcheck_interval);
        set(&mut config.healthcheck_retries, &self.healthcheck_retries);
        set(&mut config.healthcheck_timeout, &self.healthcheck_timeout);
        set(&mut config.canary_rollout_window, &self.canary_rollout_window);
        set(&mut config.rollout_window, &self.rollout_window);
        set(
            &mut config.repository_polling_interval,
            &self.repository_polling_interval,
        );
        set(&mut config.log_level, &self.log_level);
        set(&mut config.log_format, &self.log_format);
        set_opt(&mut config.member_name, &self.member_name);
        set(&mut config.redis.host, &self.redis_host);
        set(&mut config.redis.port, &self.redis_port);
        set_opt(&mut config.redis.password, &self.redis_password);
        set(&mut config.redis.db, &self.redis_db);
        set_opt(&mut config.redis.key_prefix, &self.redis_key_prefix);
    }
}

/// A validated config and where it came from.
#[derive(Debug)]
pub struct Loaded {
    pub config: FleetConfig,
    pub path: PathBuf,
    /// False when the file was missing and defaults were used.
    pub from_file: bool,
}

/// Read the config file (if present), apply overrides, validate.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Loaded> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let path = match path {
        Some(path) => expand_home(path, home.as_deref()),
        None => expand_home(Path::new(DEFAULT_CONFIG), home.as_deref()),
    };

    let from_file = path.exists();
    let mut config = if from_file {
        FleetConfig::from_file(&path)?
    } else {
        FleetConfig::default()
    };

    overrides.apply(&mut config);
    if config.github_token.as_deref().is_none_or(str::is_empty) {
        config.github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
    }
    config
        .validate()
        .with_context(|| format!("config {}", path.display()))?;

    Ok(Loaded {
        config,
        path,
        from_file,
    })
}

/// Expand a leading `~` to `home`.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration: {s}"))
}

fn log_format_arg(s: &str) -> Result<LogFormat, String> {
    match s {
        "json" => Ok(LogFormat::Json),
        "text" => Ok(LogFormat::Text),
        other => Err(format!("unknown log format: {other}")),
    }
}
