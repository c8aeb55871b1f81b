//! Canary verification.
//!
//! Runs the health-check command in two phases:
//!
//! 1. a burst of up to `retries` attempts, `delay` apart, bounded by an
//!    overall deadline of `timeout×retries + delay×retries`. One success
//!    ends the burst; if every attempt fails, verification fails with the
//!    last attempt's output.
//! 2. a watch that re-runs the check every `interval` until the canary
//!    window (measured from the start of verification) has elapsed. Any
//!    failure here fails verification at once; the burst already spent
//!    the retry budget.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fleet_core::FleetConfig;
use fleet_exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, ExecResult};

use crate::error::HealthCheckError;

/// Health-check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    pub command: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Pause between burst attempts.
    pub delay: Duration,
    /// Burst attempt budget.
    pub retries: u32,
    /// Period of the watch phase.
    pub interval: Duration,
    /// How long the canary is watched in total.
    pub window: Duration,
}

impl HealthPolicy {
    /// The health-check interval doubles as the burst delay.
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            command: config.healthcheck_command.clone(),
            timeout: config.healthcheck_timeout,
            delay: config.healthcheck_interval,
            retries: config.healthcheck_retries,
            interval: config.healthcheck_interval,
            window: config.canary_rollout_window,
        }
    }

    /// Overall deadline of the initial burst.
    pub fn burst_deadline(&self) -> Duration {
        self.timeout
            .saturating_add(self.delay)
            .saturating_mul(self.retries)
    }
}

/// Summary of a passed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    /// Attempts the burst needed.
    pub attempts: u32,
    /// Checks run during the watch.
    pub watch_checks: u32,
}

/// Runs verification through a [`CommandRunner`].
#[derive(Clone)]
pub struct HealthChecker {
    runner: Arc<dyn CommandRunner>,
    policy: HealthPolicy,
}

impl HealthChecker {
    pub fn new(runner: Arc<dyn CommandRunner>, policy: HealthPolicy) -> Self {
        Self { runner, policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Verify a freshly deployed `tag`: burst, then watch.
    pub async fn verify(&self, tag: &str, asset: &Path) -> Result<Verified, HealthCheckError> {
        let start = Instant::now();
        let attempts = self.burst(tag, asset).await?;
        info!(tag, attempts, "health check passed, watching canary");

        let watch_checks = self.watch(tag, asset, start).await?;
        info!(tag, watch_checks, "canary window elapsed, health verified");

        Ok(Verified {
            attempts,
            watch_checks,
        })
    }

    /// Initial bounded-retry burst. Returns the number of attempts used.
    pub async fn burst(&self, tag: &str, asset: &Path) -> Result<u32, HealthCheckError> {
        let retries = self.policy.retries.max(1);
        let deadline = self.policy.burst_deadline();
        let mut attempts = 0u32;
        let mut last_error: Option<ExecError> = None;

        let run = async {
            loop {
                attempts += 1;
                match self.probe(tag, asset).await {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        warn!(
                            tag,
                            attempt = attempts,
                            retries,
                            error = %e,
                            out = %e.output(),
                            "health check attempt failed"
                        );
                        last_error = Some(e);
                    }
                }
                if attempts >= retries {
                    return Err(());
                }
                tokio::time::sleep(self.policy.delay).await;
            }
        };

        let result = tokio::time::timeout(deadline, run).await;
        match result {
            Ok(Ok(())) => Ok(attempts),
            Ok(Err(())) => match last_error {
                Some(source) => Err(HealthCheckError::BurstFailed { attempts, source }),
                None => Err(HealthCheckError::DeadlineExceeded {
                    after: deadline,
                    attempts,
                    output: String::new(),
                }),
            },
            Err(_) => Err(HealthCheckError::DeadlineExceeded {
                after: deadline,
                attempts,
                output: last_error
                    .map(|e| e.output().to_string())
                    .unwrap_or_default(),
            }),
        }
    }

    /// Re-check on a fixed interval until `window` has passed since `start`.
    async fn watch(&self, tag: &str, asset: &Path, start: Instant) -> Result<u32, HealthCheckError> {
        let window_end = start + self.policy.window;
        let mut ticker = tokio::time::interval_at(start + self.policy.interval, self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut checks = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(window_end) => return Ok(checks),
                _ = ticker.tick() => {
                    checks += 1;
                    if let Err(source) = self.probe(tag, asset).await {
                        warn!(tag, error = %source, out = %source.output(), "health check failed during canary watch");
                        return Err(HealthCheckError::WatchFailed {
                            elapsed: start.elapsed(),
                            source,
                        });
                    }
                }
            }
        }
    }

    async fn probe(&self, tag: &str, asset: &Path) -> ExecResult<CommandOutput> {
        let spec = CommandSpec::new(self.policy.command.clone())
            .release(tag, asset)
            .timeout(self.policy.timeout);
        let output = self.runner.run(spec).await?;
        debug!(tag, out = %output.combined, "health check ok");
        Ok(output)
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use fleet_exec::testing::{Reply, ScriptedRunner};

    use super::*;

    const HEALTH: &str = "curl -fsS localhost/healthz";

    fn policy(window: Duration, interval: Duration) -> HealthPolicy {
        HealthPolicy {
            command: HEALTH.to_string(),
            timeout: Duration::from_secs(1),
            delay: Duration::from_secs(1),
            retries: 3,
            interval,
            window,
        }
    }

    fn checker(runner: &Arc<ScriptedRunner>, policy: HealthPolicy) -> HealthChecker {
        HealthChecker::new(runner.clone(), policy)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(HEALTH, Reply::fail("down"))
                .reply(HEALTH, Reply::fail("still down"))
                .reply(HEALTH, Reply::ok("up")),
        );
        let checker = checker(&runner, policy(Duration::from_secs(1), Duration::from_secs(1)));

        let verified = checker.verify("v2", Path::new("/tmp/a")).await.unwrap();
        assert_eq!(verified.attempts, 3);
        assert_eq!(verified.watch_checks, 0);
        assert_eq!(runner.count(HEALTH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_budget_with_last_output() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(HEALTH, Reply::fail("first"))
                .reply(HEALTH, Reply::fail("second"))
                .reply(HEALTH, Reply::fail("third"))
                .fallback(HEALTH, Reply::ok("unreachable")),
        );
        let checker = checker(&runner, policy(Duration::from_secs(1), Duration::from_secs(1)));

        let err = checker.verify("v2", Path::new("/tmp/a")).await.unwrap_err();
        assert!(matches!(err, HealthCheckError::BurstFailed { attempts: 3, .. }));
        assert_eq!(err.output(), "third");
        assert_eq!(runner.count(HEALTH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_waits_delay_between_attempts() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(HEALTH, Reply::fail("down"))
                .reply(HEALTH, Reply::ok("up")),
        );
        let checker = checker(&runner, policy(Duration::from_secs(1), Duration::from_secs(1)));

        let start = Instant::now();
        let attempts = checker.burst("v2", Path::new("/tmp/a")).await.unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_runs_until_window_ends() {
        let runner = Arc::new(ScriptedRunner::new());
        let checker = checker(&runner, policy(Duration::from_secs(10), Duration::from_secs(3)));

        let start = Instant::now();
        let verified = checker.verify("v2", Path::new("/tmp/a")).await.unwrap();
        assert_eq!(verified.attempts, 1);
        assert_eq!(verified.watch_checks, 3);
        assert_eq!(runner.count(HEALTH), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_failure_is_immediate() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(HEALTH, Reply::ok("up"))
                .reply(HEALTH, Reply::ok("up"))
                .reply(HEALTH, Reply::fail("crashed")),
        );
        let checker = checker(&runner, policy(Duration::from_secs(60), Duration::from_secs(3)));

        let err = checker.verify("v2", Path::new("/tmp/a")).await.unwrap_err();
        match &err {
            HealthCheckError::WatchFailed { elapsed, .. } => {
                assert_eq!(*elapsed, Duration::from_secs(6));
            }
            other => panic!("expected WatchFailed, got {other:?}"),
        }
        assert_eq!(err.output(), "crashed");
        assert_eq!(runner.count(HEALTH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_count_against_budget() {
        let runner = Arc::new(ScriptedRunner::new().fallback(HEALTH, Reply::Hang));
        let checker = checker(&runner, policy(Duration::from_secs(1), Duration::from_secs(1)));

        let err = checker.burst("v2", Path::new("/tmp/a")).await.unwrap_err();
        match err {
            HealthCheckError::BurstFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, ExecError::TimedOut { .. }));
            }
            other => panic!("expected BurstFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn checks_receive_release_environment() {
        let runner = Arc::new(ScriptedRunner::new());
        let checker = checker(&runner, policy(Duration::ZERO, Duration::from_secs(1)));

        checker.verify("v2", Path::new("/srv/a.tgz")).await.unwrap();
        let call = &runner.calls_to(HEALTH)[0];
        assert_eq!(call.env_var("RELEASE_TAG"), Some("v2"));
        assert_eq!(call.env_var("ASSET_FILE"), Some("/srv/a.tgz"));
        assert_eq!(call.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn burst_deadline_covers_timeouts_and_delays() {
        let policy = policy(Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(policy.burst_deadline(), Duration::from_secs(6));

        let from_config = HealthPolicy::from_config(&FleetConfig::default());
        assert_eq!(from_config.burst_deadline(), Duration::from_secs(30 * 3 + 60 * 3));
    }

    #[test]
    fn burst_deadline_saturates() {
        let mut policy = policy(Duration::from_secs(10), Duration::from_secs(1));
        policy.timeout = Duration::from_secs(u64::MAX / 2);
        policy.retries = u32::MAX;
        assert_eq!(policy.burst_deadline(), Duration::MAX);
    }
}
