use std::time::Duration;

use fleet_exec::ExecError;
use thiserror::Error;

/// Why a freshly deployed canary failed verification.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// Every attempt of the initial burst failed.
    #[error("health check failed after {attempts} attempts: {source}")]
    BurstFailed {
        attempts: u32,
        #[source]
        source: ExecError,
    },

    /// The burst ran past its overall deadline.
    #[error("health check burst exceeded {after:?} after {attempts} attempts")]
    DeadlineExceeded {
        after: Duration,
        attempts: u32,
        output: String,
    },

    /// A check failed while watching the canary.
    #[error("health check failed during canary watch after {elapsed:?}: {source}")]
    WatchFailed {
        elapsed: Duration,
        #[source]
        source: ExecError,
    },
}

impl HealthCheckError {
    /// Output of the last health-check invocation.
    pub fn output(&self) -> &str {
        match self {
            HealthCheckError::BurstFailed { source, .. }
            | HealthCheckError::WatchFailed { source, .. } => source.output(),
            HealthCheckError::DeadlineExceeded { output, .. } => output,
        }
    }
}
