//! Rollback after a failed canary.

use tracing::{info, warn};

use crate::context::NodeContext;
use crate::error::{CycleError, CycleResult};

/// Result of a rollback attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The rollback hook restored `tag`.
    Performed { tag: String },
    /// No rollback command is configured.
    Unavailable,
}

/// Restore the version that ran before `failed` was deployed.
///
/// The target is `before_install`, or the stable tag when nothing was
/// installed. Having no target at all is an error; having no rollback
/// command is not.
pub async fn rollback(
    ctx: &NodeContext,
    failed: &str,
    before_install: &str,
) -> CycleResult<RollbackOutcome> {
    let target = ctx
        .state
        .rollback_target(before_install)
        .await?
        .ok_or_else(|| CycleError::NoRollbackTarget {
            failed: failed.to_string(),
        })?;

    let Some(command) = ctx.hooks.rollback_command.as_deref() else {
        info!(failed, target = %target, "no rollback command configured");
        return Ok(RollbackOutcome::Unavailable);
    };

    warn!(failed, target = %target, "rolling back");
    let asset = ctx
        .source
        .download_asset(&target)
        .await
        .map_err(|source| CycleError::RollbackAsset {
            tag: target.clone(),
            source,
        })?;
    ctx.run_hook(command, &asset)
        .await
        .map_err(|source| CycleError::Rollback {
            tag: target.clone(),
            source,
        })?;

    if let Err(e) = ctx.report().await {
        warn!(error = %e, "failed to report after rollback");
    }
    Ok(RollbackOutcome::Performed { tag: target })
}

#[cfg(test)]
mod tests {
    use fleet_exec::testing::Reply;
    use fleet_state::MemoryStore;

    use super::*;
    use crate::testkit::{self, ROLLBACK};

    #[tokio::test]
    async fn restores_previous_install() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), true);

        let outcome = rollback(&node.ctx, "v2", "v1").await.unwrap();
        assert_eq!(outcome, RollbackOutcome::Performed { tag: "v1".to_string() });

        let calls = node.runner.calls_to(ROLLBACK);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].env_var("RELEASE_TAG"), Some("v1"));
        assert_eq!(
            calls[0].env_var("ASSET_FILE"),
            Some(node.source.asset_path("v1").to_str().unwrap())
        );
        assert_eq!(node.runner.installed(), "v1");
    }

    #[tokio::test]
    async fn falls_back_to_stable_tag() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), true);
        node.ctx.state.set_stable_tag("v0").await.unwrap();

        let outcome = rollback(&node.ctx, "v2", "").await.unwrap();
        assert_eq!(outcome, RollbackOutcome::Performed { tag: "v0".to_string() });
    }

    #[tokio::test]
    async fn no_target_is_an_error() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), true);

        let err = rollback(&node.ctx, "v2", "").await.unwrap_err();
        assert!(matches!(err, CycleError::NoRollbackTarget { ref failed } if failed == "v2"));
        assert_eq!(node.runner.count(ROLLBACK), 0);
    }

    #[tokio::test]
    async fn missing_command_is_unavailable() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), false);

        let outcome = rollback(&node.ctx, "v2", "v1").await.unwrap();
        assert_eq!(outcome, RollbackOutcome::Unavailable);
        assert_eq!(node.runner.count(ROLLBACK), 0);
    }

    #[tokio::test]
    async fn asset_download_failure_is_fatal() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), true);
        node.source.break_download("v1");

        let err = rollback(&node.ctx, "v2", "v1").await.unwrap_err();
        assert!(matches!(err, CycleError::RollbackAsset { ref tag, .. } if tag == "v1"));
        assert!(!err.is_recoverable());
        assert_eq!(node.runner.count(ROLLBACK), 0);
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let store = MemoryStore::new();
        let runner = testkit::runner("v2").reply(ROLLBACK, Reply::fail("cannot restore"));
        let node = testkit::node(&store, "web-1", runner, true);

        let err = rollback(&node.ctx, "v2", "v1").await.unwrap_err();
        assert!(matches!(err, CycleError::Rollback { ref tag, .. } if tag == "v1"));
        assert_eq!(err.output(), Some("cannot restore"));
    }
}
