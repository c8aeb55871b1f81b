//! Everything a control loop needs on one node, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use fleet_core::FleetConfig;
use fleet_exec::{CommandRunner, CommandSpec, installed_version};
use fleet_source::{Asset, ReleaseSource};
use fleet_state::FleetState;

use crate::error::{CycleError, CycleResult};

/// Operator hook commands and their limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hooks {
    pub deploy_command: String,
    pub rollback_command: Option<String>,
    pub version_command: String,
    pub deploy_timeout: Duration,
    pub version_timeout: Duration,
    pub include_prerelease: bool,
}

impl Hooks {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            deploy_command: config.deploy_command.clone(),
            rollback_command: config.rollback_command().map(str::to_string),
            version_command: config.version_command.clone(),
            deploy_timeout: config.deploy_timeout,
            version_timeout: config.version_timeout,
            include_prerelease: config.include_prerelease,
        }
    }
}

#[derive(Clone)]
pub struct NodeContext {
    pub state: FleetState,
    pub runner: Arc<dyn CommandRunner>,
    pub source: Arc<dyn ReleaseSource>,
    pub hooks: Hooks,
}

impl NodeContext {
    pub fn new(
        state: FleetState,
        runner: Arc<dyn CommandRunner>,
        source: Arc<dyn ReleaseSource>,
        hooks: Hooks,
    ) -> Self {
        Self {
            state,
            runner,
            source,
            hooks,
        }
    }

    /// What this node runs right now. Empty when nothing is installed.
    pub async fn installed_version(&self) -> CycleResult<String> {
        installed_version(
            self.runner.as_ref(),
            &self.hooks.version_command,
            self.hooks.version_timeout,
        )
        .await
        .map_err(CycleError::Version)
    }

    /// Assert liveness with the current version. Returns that version.
    pub async fn report(&self) -> CycleResult<String> {
        let version = self.installed_version().await?;
        self.state.report_self(&version).await?;
        Ok(version)
    }

    /// Run the deploy hook for `asset`.
    pub async fn deploy(&self, asset: &Asset) -> CycleResult<()> {
        self.run_hook(&self.hooks.deploy_command, asset)
            .await
            .map_err(|source| CycleError::Deploy {
                tag: asset.tag.clone(),
                source,
            })
    }

    pub(crate) async fn run_hook(
        &self,
        command: &str,
        asset: &Asset,
    ) -> Result<(), fleet_exec::ExecError> {
        info!(tag = %asset.tag, asset = %asset.path.display(), %command, "running hook");
        let spec = CommandSpec::new(command)
            .release(&asset.tag, &asset.path)
            .timeout(self.hooks.deploy_timeout);
        self.runner.run(spec).await?;
        Ok(())
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("state", &self.state)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
