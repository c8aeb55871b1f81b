//! FleetState: the only door to the shared store.
//!
//! Owns every fleet-wide key (locks, stable tag, avoid set, member
//! registry) and exposes the narrow operations the control loops need.
//! Callers never see the store itself.
//!
//! Nothing here is transactional across calls. The lock acquisition is
//! the correctness gate; the reads around it may be stale by the time
//! the caller acts on them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::keys::KeySpace;
use crate::store::SharedStore;
use crate::types::{InstallGate, LockTtls, MemberRecord, RolloutProgress};

/// Coordination state as seen by one fleet member.
#[derive(Clone)]
pub struct FleetState {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    member: String,
    ttls: LockTtls,
}

impl FleetState {
    /// Create the state handle for `member_name` in the fleet keyed by `prefix`.
    pub fn new(
        store: Arc<dyn SharedStore>,
        prefix: &str,
        member_name: &str,
        ttls: LockTtls,
    ) -> Self {
        Self {
            store,
            keys: KeySpace::new(prefix),
            member: KeySpace::member_id(member_name, prefix),
            ttls,
        }
    }

    /// This member's identifier (`{member_name}:{prefix}`).
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn ttls(&self) -> LockTtls {
        self.ttls
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Take `key` for `tag` unless someone already holds it.
    ///
    /// Returns true only for the caller that created the key.
    pub async fn acquire_lock(&self, key: &str, tag: &str, ttl: Duration) -> StateResult<bool> {
        let acquired = self.store.set_nx_px(key, tag, ttl).await?;
        debug!(%key, %tag, ?ttl, acquired, "lock attempt");
        Ok(acquired)
    }

    /// Drop a lock regardless of who holds it.
    pub async fn release_lock(&self, key: &str) -> StateResult<()> {
        let existed = self.store.del(key).await?;
        debug!(%key, existed, "lock released");
        Ok(())
    }

    pub async fn try_canary_lock(&self, tag: &str) -> StateResult<bool> {
        self.acquire_lock(&self.keys.canary_lock, tag, self.ttls.canary_lock)
            .await
    }

    pub async fn try_rollout_lock(&self, tag: &str) -> StateResult<bool> {
        self.acquire_lock(&self.keys.rollout_lock, tag, self.ttls.rollout_lock)
            .await
    }

    pub async fn release_canary_lock(&self) -> StateResult<()> {
        self.release_lock(&self.keys.canary_lock).await
    }

    // ── Tags ───────────────────────────────────────────────────────

    /// The version authorised for fleet-wide rollout, if any.
    pub async fn stable_tag(&self) -> StateResult<Option<String>> {
        let tag = self.store.get(&self.keys.stable_tag).await?;
        Ok(tag.filter(|t| !t.is_empty()))
    }

    pub async fn set_stable_tag(&self, tag: &str) -> StateResult<()> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        self.store.set(&self.keys.stable_tag, tag).await?;
        info!(%tag, "stable tag updated");
        Ok(())
    }

    /// Blacklist a tag. The avoid set only ever grows.
    pub async fn add_avoid_tag(&self, tag: &str) -> StateResult<()> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        self.store.sadd(&self.keys.avoid_tags, tag).await?;
        info!(%tag, "tag added to avoid set");
        Ok(())
    }

    pub async fn avoid_tags(&self) -> StateResult<BTreeSet<String>> {
        let tags = self.store.smembers(&self.keys.avoid_tags).await?;
        Ok(tags.into_iter().collect())
    }

    // ── Members ────────────────────────────────────────────────────

    /// Register this member and refresh its record's TTL.
    pub async fn report_self(&self, current_version: &str) -> StateResult<()> {
        let record = MemberRecord {
            current_version: current_version.to_string(),
        };
        let value =
            serde_json::to_string(&record).map_err(|e| StateError::Serialize(e.to_string()))?;

        self.store.sadd(&self.keys.members, &self.member).await?;
        self.store
            .set_px(&self.member, &value, self.ttls.member_record)
            .await?;
        debug!(member = %self.member, %current_version, "member reported");
        Ok(())
    }

    /// Count live members running `tag`.
    ///
    /// Members whose record has expired are treated as departed: they are
    /// left out of both counts and pruned from the registry.
    pub async fn rollout_progress(&self, tag: &str) -> StateResult<RolloutProgress> {
        let members = self.store.smembers(&self.keys.members).await?;
        let mut departed = Vec::new();
        let mut progress = RolloutProgress::default();

        for member in members {
            let Some(raw) = self.store.get(&member).await? else {
                departed.push(member);
                continue;
            };
            let record: MemberRecord =
                serde_json::from_str(&raw).map_err(|e| StateError::Deserialize(e.to_string()))?;
            progress.total += 1;
            if record.current_version == tag {
                progress.installed += 1;
            }
        }

        if !departed.is_empty() {
            self.store.srem(&self.keys.members, &departed).await?;
            info!(count = departed.len(), members = ?departed, "pruned departed members");
        }

        Ok(progress)
    }

    // ── Policy ─────────────────────────────────────────────────────

    /// Decide whether `tag` may be deployed on a node running `installed`.
    ///
    /// The avoid set is consulted only when the tag differs from what is
    /// already installed.
    pub async fn can_install(&self, tag: &str, installed: &str) -> StateResult<InstallGate> {
        if tag.is_empty() {
            return Err(StateError::EmptyTag);
        }
        if tag == installed {
            return Ok(InstallGate::AlreadyInstalled);
        }
        if self.avoid_tags().await?.contains(tag) {
            return Ok(InstallGate::Avoided);
        }
        Ok(InstallGate::Proceed)
    }

    /// Version to restore after a failed canary: the one installed before
    /// the deploy, else the current stable tag.
    pub async fn rollback_target(&self, before_install: &str) -> StateResult<Option<String>> {
        if !before_install.is_empty() {
            return Ok(Some(before_install.to_string()));
        }
        self.stable_tag().await
    }
}

impl std::fmt::Debug for FleetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetState")
            .field("member", &self.member)
            .field("keys", &self.keys)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}
