//! Command execution errors.

use std::time::Duration;

use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {after:?}")]
    TimedOut { command: String, after: Duration },

    #[error("`{command}` exited with {}: {output}", exit_label(*.code))]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

impl ExecError {
    /// Captured combined output, empty when the command never finished.
    pub fn output(&self) -> &str {
        match self {
            ExecError::Failed { output, .. } => output,
            ExecError::Spawn { .. } | ExecError::TimedOut { .. } => "",
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}
