use std::time::Duration;

use crate::command::{CommandRunner, CommandSpec};
use crate::error::ExecResult;

/// Ask the node which version it runs, via the configured version command.
///
/// Returns trimmed standard output. An empty string means nothing is
/// installed yet.
pub async fn installed_version(
    runner: &dyn CommandRunner,
    command: &str,
    timeout: Duration,
) -> ExecResult<String> {
    let output = runner
        .run(CommandSpec::new(command).timeout(timeout))
        .await?;
    Ok(output.stdout.trim().to_string())
}
