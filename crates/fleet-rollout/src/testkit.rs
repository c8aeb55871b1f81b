//! Shared fixtures for the control-loop tests.

use std::sync::Arc;
use std::time::Duration;

use fleet_exec::testing::ScriptedRunner;
use fleet_health::HealthPolicy;
use fleet_source::testing::StaticSource;
use fleet_state::{FleetState, LockTtls, MemoryStore};

use crate::context::{Hooks, NodeContext};

pub const DEPLOY: &str = "deploy.sh";
pub const ROLLBACK: &str = "rollback.sh";
pub const VERSION: &str = "cat VERSION";
pub const HEALTH: &str = "healthz.sh";
pub const PREFIX: &str = "acme/widget";

pub struct Node {
    pub ctx: Arc<NodeContext>,
    pub runner: Arc<ScriptedRunner>,
    pub source: Arc<StaticSource>,
}

/// Runner whose deploy and rollback hooks move the installed version.
pub fn runner(installed: &str) -> ScriptedRunner {
    ScriptedRunner::new()
        .with_installed(installed)
        .version_command(VERSION)
        .installs_on(DEPLOY)
        .installs_on(ROLLBACK)
}

pub fn ttls() -> LockTtls {
    LockTtls {
        canary_lock: Duration::from_secs(600),
        rollout_lock: Duration::from_secs(60),
        member_record: Duration::from_secs(120),
    }
}

pub fn hooks(with_rollback: bool) -> Hooks {
    Hooks {
        deploy_command: DEPLOY.to_string(),
        rollback_command: with_rollback.then(|| ROLLBACK.to_string()),
        version_command: VERSION.to_string(),
        deploy_timeout: Duration::from_secs(300),
        version_timeout: Duration::from_secs(30),
        include_prerelease: false,
    }
}

/// One-second everything: a passing canary is verified after a single check.
pub fn health_policy() -> HealthPolicy {
    HealthPolicy {
        command: HEALTH.to_string(),
        timeout: Duration::from_secs(1),
        delay: Duration::from_secs(1),
        retries: 3,
        interval: Duration::from_secs(1),
        window: Duration::from_secs(1),
    }
}

pub fn node(store: &MemoryStore, name: &str, runner: ScriptedRunner, with_rollback: bool) -> Node {
    let runner = Arc::new(runner);
    let source = Arc::new(StaticSource::new("/srv/assets"));
    let state = FleetState::new(Arc::new(store.clone()), PREFIX, name, ttls());
    let ctx = NodeContext::new(state, runner.clone(), source.clone(), hooks(with_rollback));
    Node {
        ctx: Arc::new(ctx),
        runner,
        source,
    }
}
