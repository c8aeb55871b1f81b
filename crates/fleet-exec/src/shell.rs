//! ShellRunner: runs hooks through `sh -c`.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::command::{CommandOutput, CommandRunner, CommandSpec, RunFuture};
use crate::error::{ExecError, ExecResult};

/// Runs commands with `sh -c`, inheriting the daemon's environment.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell (e.g. `bash`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn execute(&self, spec: CommandSpec) -> ExecResult<CommandOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&spec.command)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out child is killed when its future is dropped.
            .kill_on_drop(true);

        debug!(command = %spec.command, timeout = ?spec.timeout, "running command");

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let wait = child.wait_with_output();
        let result = match spec.timeout {
            Some(after) => match tokio::time::timeout(after, wait).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ExecError::TimedOut {
                        command: spec.command,
                        after,
                    });
                }
            },
            None => wait.await,
        };
        let output = result.map_err(|source| ExecError::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}");

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: spec.command,
                code: output.status.code(),
                output: combined,
            });
        }

        debug!(command = %spec.command, out = %combined, "command result");
        Ok(CommandOutput { stdout, combined })
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, spec: CommandSpec) -> RunFuture<'_> {
        Box::pin(self.execute(spec))
    }
}
