//! Canary release: one node trials each new release.
//!
//! Per tick: report, snapshot, discover, gate, download, lock, deploy,
//! verify, then promote or roll back. The canary lock is the only
//! fleet-wide mutual exclusion; everything read before it may be stale.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fleet_health::HealthChecker;
use fleet_source::SourceError;
use fleet_state::InstallGate;

use crate::context::NodeContext;
use crate::error::CycleResult;
use crate::rollback::{RollbackOutcome, rollback};

/// How a canary cycle ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanaryOutcome {
    /// The newest release is already stable, or there is none.
    NoNewRelease { tag: Option<String> },
    AlreadyInstalled { tag: String },
    /// The release failed verification before.
    Avoided { tag: String },
    NoMatchingAsset { tag: String },
    /// Another node is trialling this release.
    LockNotAcquired { tag: String },
    /// Verified and promoted to stable.
    Promoted { tag: String },
    /// Verification failed and the previous version was restored.
    RolledBack {
        failed: String,
        restored: String,
        reason: String,
    },
    /// Verification failed and no rollback command is configured.
    NoRollbackAvailable { failed: String, reason: String },
}

impl fmt::Display for CanaryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanaryOutcome::NoNewRelease { .. } => write!(f, "no new release"),
            CanaryOutcome::AlreadyInstalled { tag } => write!(f, "{tag} already installed"),
            CanaryOutcome::Avoided { tag } => write!(f, "{tag} is in the avoid set"),
            CanaryOutcome::NoMatchingAsset { tag } => write!(f, "{tag} has no matching asset"),
            CanaryOutcome::LockNotAcquired { tag } => write!(f, "canary lock for {tag} held elsewhere"),
            CanaryOutcome::Promoted { tag } => write!(f, "{tag} promoted to stable"),
            CanaryOutcome::RolledBack {
                failed, restored, ..
            } => write!(f, "{failed} failed verification, rolled back to {restored}"),
            CanaryOutcome::NoRollbackAvailable { failed, .. } => {
                write!(f, "{failed} failed verification, no rollback command")
            }
        }
    }
}

pub struct CanaryRelease {
    ctx: Arc<NodeContext>,
    checker: HealthChecker,
}

impl CanaryRelease {
    pub fn new(ctx: Arc<NodeContext>, checker: HealthChecker) -> Self {
        Self { ctx, checker }
    }

    /// Run one canary cycle.
    pub async fn tick(&self) -> CycleResult<CanaryOutcome> {
        let ctx = &self.ctx;

        // Liveness first, so a crash mid-cycle still leaves a fresh record.
        let installed = ctx.report().await?;
        let stable = ctx.state.stable_tag().await?;

        let tag = match ctx.source.fetch_latest(ctx.hooks.include_prerelease).await {
            Ok(tag) => tag,
            Err(SourceError::NoRelease(_)) => return Ok(CanaryOutcome::NoNewRelease { tag: None }),
            Err(e) => return Err(e.into()),
        };
        if stable.as_deref() == Some(tag.as_str()) {
            return Ok(CanaryOutcome::NoNewRelease { tag: Some(tag) });
        }

        match ctx.state.can_install(&tag, &installed).await? {
            InstallGate::Proceed => {}
            InstallGate::AlreadyInstalled => return Ok(CanaryOutcome::AlreadyInstalled { tag }),
            InstallGate::Avoided => return Ok(CanaryOutcome::Avoided { tag }),
        }

        // Download before locking: a missing asset must not hold the lock.
        let asset = match ctx.source.download_asset(&tag).await {
            Ok(asset) => asset,
            Err(SourceError::NoMatchingAsset { .. }) => {
                return Ok(CanaryOutcome::NoMatchingAsset { tag });
            }
            Err(e) => return Err(e.into()),
        };

        if !ctx.state.try_canary_lock(&tag).await? {
            return Ok(CanaryOutcome::LockNotAcquired { tag });
        }

        info!(tag = %tag, current_version = %installed, "canary lock acquired, deploying");
        // On deploy failure the lock is left to expire.
        ctx.deploy(&asset).await?;

        match self.checker.verify(&tag, &asset.path).await {
            Ok(verified) => {
                debug!(tag = %tag, attempts = verified.attempts, watch_checks = verified.watch_checks, "canary verified");
                ctx.state.set_stable_tag(&tag).await?;
                if let Err(e) = ctx.report().await {
                    warn!(error = %e, "failed to report after promotion");
                }
                ctx.state.release_canary_lock().await?;
                Ok(CanaryOutcome::Promoted { tag })
            }
            Err(health) => {
                error!(tag = %tag, error = %health, out = %health.output(), "canary failed verification");
                ctx.state.add_avoid_tag(&tag).await?;
                // The canary lock stays until its TTL runs out.
                let reason = health.to_string();
                match rollback(ctx, &tag, &installed).await? {
                    RollbackOutcome::Performed { tag: restored } => Ok(CanaryOutcome::RolledBack {
                        failed: tag,
                        restored,
                        reason,
                    }),
                    RollbackOutcome::Unavailable => {
                        Ok(CanaryOutcome::NoRollbackAvailable { failed: tag, reason })
                    }
                }
            }
        }
    }
}

impl fmt::Debug for CanaryRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanaryRelease")
            .field("ctx", &self.ctx)
            .field("checker", &self.checker)
            .finish()
    }
}
