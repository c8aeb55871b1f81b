//! Command invocation model and the runner trait.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ExecResult;

/// Environment variable carrying the release tag a hook acts on.
pub const RELEASE_TAG_ENV: &str = "RELEASE_TAG";
/// Environment variable carrying the downloaded artifact path.
pub const ASSET_FILE_ENV: &str = "ASSET_FILE";

/// A shell command plus the environment and deadline to run it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Inject `RELEASE_TAG` and `ASSET_FILE`.
    pub fn release(mut self, tag: &str, asset_file: &Path) -> Self {
        self.env.push((RELEASE_TAG_ENV.to_string(), tag.to_string()));
        self.env.push((
            ASSET_FILE_ENV.to_string(),
            asset_file.to_string_lossy().into_owned(),
        ));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of an injected variable.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// What a successful command printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output only.
    pub stdout: String,
    /// Standard output followed by standard error.
    pub combined: String,
}

/// Boxed future returned by [`CommandRunner::run`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = ExecResult<CommandOutput>> + Send + 'a>>;

/// Runs hook commands. Injected so the control loops can be tested
/// without spawning processes.
///
/// A non-zero exit is an error carrying the captured output. Runners
/// never retry; retry policy belongs to the caller.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: CommandSpec) -> RunFuture<'_>;
}
