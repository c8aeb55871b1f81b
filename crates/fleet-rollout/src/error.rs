//! Errors that end a control-loop cycle.

use fleet_exec::ExecError;
use fleet_source::SourceError;
use fleet_state::StateError;
use thiserror::Error;

pub type CycleResult<T> = Result<T, CycleError>;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to query installed version: {0}")]
    Version(#[source] ExecError),

    #[error("deploy of {tag} failed: {source}")]
    Deploy {
        tag: String,
        #[source]
        source: ExecError,
    },

    #[error("rollback to {tag} failed: {source}")]
    Rollback {
        tag: String,
        #[source]
        source: ExecError,
    },

    /// The rollback target's asset could not be fetched. Fatal even when
    /// the underlying source error is transient: the node is still running
    /// the release that just failed verification.
    #[error("rollback to {tag} failed: {source}")]
    RollbackAsset {
        tag: String,
        #[source]
        source: SourceError,
    },

    #[error("no rollback target for failed release {failed}")]
    NoRollbackTarget { failed: String },
}

impl CycleError {
    /// Release source hiccups are retried on the next tick; everything
    /// else needs an operator.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CycleError::Source(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Captured output of the command that failed, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            CycleError::Version(source)
            | CycleError::Deploy { source, .. }
            | CycleError::Rollback { source, .. } => Some(source.output()),
            _ => None,
        }
    }
}
