//! Fleet rollout: every node converges on the stable tag.
//!
//! The rollout lock lets one node at a time deploy; the lock expires after
//! one rollout window so the next node can follow. There is no rollback
//! here: the stable tag already passed canary verification.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use fleet_source::SourceError;
use fleet_state::{InstallGate, RolloutProgress};

use crate::context::NodeContext;
use crate::error::CycleResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// Nothing has been promoted yet.
    NoStableTag,
    AlreadyInstalled { tag: String },
    /// The stable tag is in the avoid set.
    Avoided { tag: String },
    NoMatchingAsset { tag: String },
    LockNotAcquired { tag: String },
    Deployed { tag: String, progress: RolloutProgress },
}

impl fmt::Display for RolloutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutOutcome::NoStableTag => write!(f, "no stable tag"),
            RolloutOutcome::AlreadyInstalled { tag } => write!(f, "{tag} already installed"),
            RolloutOutcome::Avoided { tag } => write!(f, "stable tag {tag} is in the avoid set"),
            RolloutOutcome::NoMatchingAsset { tag } => write!(f, "{tag} has no matching asset"),
            RolloutOutcome::LockNotAcquired { tag } => write!(f, "rollout lock for {tag} held elsewhere"),
            RolloutOutcome::Deployed { tag, progress } => write!(f, "{tag} deployed ({progress})"),
        }
    }
}

#[derive(Debug)]
pub struct Rollout {
    ctx: Arc<NodeContext>,
}

impl Rollout {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Run one rollout cycle.
    pub async fn tick(&self) -> CycleResult<RolloutOutcome> {
        let ctx = &self.ctx;

        let installed = ctx.report().await?;
        let Some(tag) = ctx.state.stable_tag().await? else {
            return Ok(RolloutOutcome::NoStableTag);
        };

        match ctx.state.can_install(&tag, &installed).await? {
            InstallGate::Proceed => {}
            InstallGate::AlreadyInstalled => return Ok(RolloutOutcome::AlreadyInstalled { tag }),
            InstallGate::Avoided => {
                warn!(tag = %tag, "stable tag is in the avoid set, not rolling out");
                return Ok(RolloutOutcome::Avoided { tag });
            }
        }

        let asset = match ctx.source.download_asset(&tag).await {
            Ok(asset) => asset,
            Err(SourceError::NoMatchingAsset { .. }) => {
                return Ok(RolloutOutcome::NoMatchingAsset { tag });
            }
            Err(e) => return Err(e.into()),
        };

        if !ctx.state.try_rollout_lock(&tag).await? {
            return Ok(RolloutOutcome::LockNotAcquired { tag });
        }

        info!(tag = %tag, current_version = %installed, "rollout lock acquired, deploying");
        ctx.deploy(&asset).await?;

        if let Err(e) = ctx.report().await {
            warn!(error = %e, "failed to report after rollout");
        }
        let progress = ctx.state.rollout_progress(&tag).await?;
        Ok(RolloutOutcome::Deployed { tag, progress })
    }
}

#[cfg(test)]
mod tests {
    use fleet_exec::testing::Reply;
    use fleet_state::MemoryStore;

    use super::*;
    use crate::error::CycleError;
    use crate::testkit::{self, DEPLOY};

    #[tokio::test]
    async fn deploys_stable_tag_and_reports_progress() {
        let store = MemoryStore::new();
        let canary = testkit::node(&store, "web-1", testkit::runner("v2"), true);
        let node = testkit::node(&store, "web-2", testkit::runner("v1"), true);
        canary.ctx.state.report_self("v2").await.unwrap();
        canary.ctx.state.set_stable_tag("v2").await.unwrap();

        let outcome = Rollout::new(node.ctx.clone()).tick().await.unwrap();

        assert_eq!(
            outcome,
            RolloutOutcome::Deployed {
                tag: "v2".to_string(),
                progress: RolloutProgress {
                    installed: 2,
                    total: 2
                },
            }
        );
        assert_eq!(node.runner.installed(), "v2");
        let call = &node.runner.calls_to(DEPLOY)[0];
        assert_eq!(call.env_var("RELEASE_TAG"), Some("v2"));
        assert_eq!(call.timeout, Some(std::time::Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn nothing_to_do_without_stable_tag() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v1"), true);

        let outcome = Rollout::new(node.ctx.clone()).tick().await.unwrap();
        assert_eq!(outcome, RolloutOutcome::NoStableTag);
        assert!(store.contains(node.ctx.state.member()));
    }

    #[tokio::test]
    async fn already_on_stable() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v2"), true);
        node.ctx.state.set_stable_tag("v2").await.unwrap();

        let outcome = Rollout::new(node.ctx.clone()).tick().await.unwrap();
        assert_eq!(outcome, RolloutOutcome::AlreadyInstalled { tag: "v2".to_string() });
        assert!(!store.contains(&node.ctx.state.keys().rollout_lock));
    }

    #[tokio::test]
    async fn one_node_per_rollout_window() {
        let store = MemoryStore::new();
        let first = testkit::node(&store, "web-1", testkit::runner("v1"), true);
        let second = testkit::node(&store, "web-2", testkit::runner("v1"), true);
        first.ctx.state.set_stable_tag("v2").await.unwrap();

        let a = Rollout::new(first.ctx.clone()).tick().await.unwrap();
        let b = Rollout::new(second.ctx.clone()).tick().await.unwrap();

        assert!(matches!(a, RolloutOutcome::Deployed { .. }));
        assert_eq!(b, RolloutOutcome::LockNotAcquired { tag: "v2".to_string() });
        assert_eq!(second.runner.count(DEPLOY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_node_follows_after_lock_expires() {
        let store = MemoryStore::new();
        let first = testkit::node(&store, "web-1", testkit::runner("v1"), true);
        let second = testkit::node(&store, "web-2", testkit::runner("v1"), true);
        first.ctx.state.set_stable_tag("v2").await.unwrap();

        Rollout::new(first.ctx.clone()).tick().await.unwrap();
        tokio::time::advance(testkit::ttls().rollout_lock).await;
        // Keep web-1's record alive across the wait.
        first.ctx.report().await.unwrap();

        let outcome = Rollout::new(second.ctx.clone()).tick().await.unwrap();
        match outcome {
            RolloutOutcome::Deployed { progress, .. } => {
                assert!(progress.is_complete());
                assert_eq!(progress.total, 2);
            }
            other => panic!("expected Deployed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn avoided_stable_tag_is_not_rolled_out() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v1"), true);
        node.ctx.state.set_stable_tag("v2").await.unwrap();
        node.ctx.state.add_avoid_tag("v2").await.unwrap();

        let outcome = Rollout::new(node.ctx.clone()).tick().await.unwrap();
        assert_eq!(outcome, RolloutOutcome::Avoided { tag: "v2".to_string() });
        assert_eq!(node.runner.count(DEPLOY), 0);
    }

    #[tokio::test]
    async fn deploy_failure_is_fatal() {
        let store = MemoryStore::new();
        let runner = testkit::runner("v1").reply(DEPLOY, Reply::fail("exit 1"));
        let node = testkit::node(&store, "web-1", runner, true);
        node.ctx.state.set_stable_tag("v2").await.unwrap();

        let err = Rollout::new(node.ctx.clone()).tick().await.unwrap_err();
        assert!(matches!(err, CycleError::Deploy { .. }));
        assert!(!err.is_recoverable());
        assert_eq!(node.runner.installed(), "v1");
    }

    #[tokio::test]
    async fn download_failure_is_recoverable() {
        let store = MemoryStore::new();
        let node = testkit::node(&store, "web-1", testkit::runner("v1"), true);
        node.ctx.state.set_stable_tag("v2").await.unwrap();
        node.source.set_unreachable(true);

        let err = Rollout::new(node.ctx.clone()).tick().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!store.contains(&node.ctx.state.keys().rollout_lock));
    }
}
