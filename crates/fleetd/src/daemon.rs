//! The two control loops and their shutdown wiring.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, warn};

use fleet_core::FleetConfig;
use fleet_exec::{CommandRunner, ShellRunner};
use fleet_health::{HealthChecker, HealthPolicy};
use fleet_rollout::{
    CanaryOutcome, CanaryRelease, CycleError, CycleResult, Hooks, NodeContext, Rollout,
    RolloutOutcome,
};
use fleet_source::{GitHubReleases, OctocrabApi};
use fleet_state::{FleetState, LockTtls, RedisStore};

type CycleFuture = Pin<Box<dyn Future<Output = CycleResult<()>> + Send>>;

pub struct Daemon {
    canary: Arc<CanaryRelease>,
    rollout: Arc<Rollout>,
    canary_every: Duration,
    rollout_every: Duration,
}

impl Daemon {
    pub fn new(
        canary: CanaryRelease,
        rollout: Rollout,
        canary_every: Duration,
        rollout_every: Duration,
    ) -> Self {
        Self {
            canary: Arc::new(canary),
            rollout: Arc::new(rollout),
            canary_every,
            rollout_every,
        }
    }

    /// Connect to the shared store and release source and wire up both loops.
    pub async fn assemble(config: &FleetConfig, member_name: &str) -> anyhow::Result<Self> {
        let store = RedisStore::connect(&config.redis)
            .await
            .with_context(|| format!("connecting to redis at {}:{}", config.redis.host, config.redis.port))?;
        info!(host = %config.redis.host, port = config.redis.port, db = config.redis.db, "shared store connected");

        let api = OctocrabApi::from_config(config)?;
        let source = GitHubReleases::from_config(api, config)?;
        info!(repo = %config.repo, api = %config.github_api, "release source ready");

        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        let state = FleetState::new(
            Arc::new(store),
            config.key_prefix(),
            member_name,
            LockTtls::from_config(config),
        );
        let ctx = Arc::new(NodeContext::new(
            state,
            runner.clone(),
            Arc::new(source),
            Hooks::from_config(config),
        ));
        let checker = HealthChecker::new(runner, HealthPolicy::from_config(config));

        Ok(Self::new(
            CanaryRelease::new(ctx.clone(), checker),
            Rollout::new(ctx),
            config.repository_polling_interval,
            config.rollout_window,
        ))
    }

    /// Run both loops until `shutdown_signal` resolves or a loop hits a
    /// fatal error.
    pub async fn run(self, shutdown_signal: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!(
            canary_every = ?self.canary_every,
            rollout_every = ?self.rollout_every,
            "daemon started"
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let canary = self.canary.clone();
        let mut canary_task = tokio::spawn(
            drive("canary", self.canary_every, shutdown_rx.clone(), move || {
                let canary = canary.clone();
                Box::pin(async move { canary_cycle(&canary).await })
            })
            .in_current_span(),
        );
        let rollout = self.rollout.clone();
        let mut rollout_task = tokio::spawn(
            drive("rollout", self.rollout_every, shutdown_rx, move || {
                let rollout = rollout.clone();
                Box::pin(async move { rollout_cycle(&rollout).await })
            })
            .in_current_span(),
        );

        let mut failures = Vec::new();
        let mut canary_done = false;
        let mut rollout_done = false;
        tokio::select! {
            _ = shutdown_signal => info!("shutdown signal received"),
            result = &mut canary_task => {
                canary_done = true;
                failures.extend(settle("canary", result));
            }
            result = &mut rollout_task => {
                rollout_done = true;
                failures.extend(settle("rollout", result));
            }
        }

        let _ = shutdown_tx.send(true);
        if !canary_done {
            failures.extend(settle("canary", canary_task.await));
        }
        if !rollout_done {
            failures.extend(settle("rollout", rollout_task.await));
        }

        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => {
                info!("daemon stopped");
                Ok(())
            }
        }
    }

    /// One canary cycle, then one rollout cycle.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        if let Some(e) = settle("canary", Ok(canary_cycle(&self.canary).await)) {
            return Err(e);
        }
        match settle("rollout", Ok(rollout_cycle(&self.rollout).await)) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Tick `cycle` every `period` until shutdown. Recoverable errors are
/// logged and the loop carries on; any other error ends it.
async fn drive<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) -> CycleResult<()>
where
    F: FnMut() -> CycleFuture + Send,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(loop_name = name, "loop stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                match cycle().await {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => {
                        warn!(loop_name = name, error = %e, "cycle skipped, retrying next tick");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

/// Log a finished loop; return its fatal error, if any.
fn settle(name: &str, result: Result<CycleResult<()>, JoinError>) -> Option<anyhow::Error> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(e)) if e.is_recoverable() => {
            warn!(loop_name = name, error = %e, "cycle skipped");
            None
        }
        Ok(Err(e)) => {
            error!(loop_name = name, error = %e, out = e.output().unwrap_or_default(), "fatal cycle error");
            Some(anyhow::Error::new(e).context(format!("{name} cycle failed")))
        }
        Err(e) => Some(anyhow::Error::new(e).context(format!("{name} loop panicked"))),
    }
}

async fn canary_cycle(canary: &CanaryRelease) -> CycleResult<()> {
    let outcome = canary.tick().await?;
    match &outcome {
        CanaryOutcome::Promoted { tag } => info!(tag = %tag, "canary release success"),
        CanaryOutcome::RolledBack { reason, .. } => warn!(%reason, "{outcome}"),
        CanaryOutcome::NoRollbackAvailable { reason, .. } => info!(%reason, "{outcome}"),
        CanaryOutcome::NoNewRelease { .. }
        | CanaryOutcome::AlreadyInstalled { .. }
        | CanaryOutcome::Avoided { .. }
        | CanaryOutcome::NoMatchingAsset { .. }
        | CanaryOutcome::LockNotAcquired { .. } => debug!("canary: {outcome}"),
    }
    Ok(())
}

async fn rollout_cycle(rollout: &Rollout) -> CycleResult<()> {
    let outcome = rollout.tick().await?;
    match &outcome {
        RolloutOutcome::Deployed { tag, progress } => {
            info!(tag = %tag, progress = %progress, "rollout success");
        }
        RolloutOutcome::Avoided { .. } => warn!("rollout: {outcome}"),
        RolloutOutcome::NoStableTag
        | RolloutOutcome::AlreadyInstalled { .. }
        | RolloutOutcome::NoMatchingAsset { .. }
        | RolloutOutcome::LockNotAcquired { .. } => debug!("rollout: {outcome}"),
    }
    Ok(())
}
