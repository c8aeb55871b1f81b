//! fleet-exec: runs the operator's deploy, rollback, health-check and
//! version commands.
//!
//! Every hook is a shell command. Deploy and rollback receive
//! `RELEASE_TAG` and `ASSET_FILE` in their environment; exit status and
//! combined output are the only return channel. Nothing at this layer
//! retries.

pub mod command;
pub mod error;
pub mod shell;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod version;

pub use command::{
    ASSET_FILE_ENV, CommandOutput, CommandRunner, CommandSpec, RELEASE_TAG_ENV, RunFuture,
};
pub use error::{ExecError, ExecResult};
pub use shell::ShellRunner;
pub use version::installed_version;
