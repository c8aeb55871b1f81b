//! Shared-store key layout.
//!
//! Every fleet-wide key is `{prefix}_<name>`. Member records live under
//! `{member_name}:{prefix}`, one per node.

/// The keys one fleet (one repository) coordinates through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    pub canary_lock: String,
    pub stable_tag: String,
    pub avoid_tags: String,
    pub members: String,
    pub rollout_lock: String,
}

impl KeySpace {
    pub fn new(prefix: &str) -> Self {
        Self {
            canary_lock: format!("{prefix}_canary_release_tag"),
            stable_tag: format!("{prefix}_stable_release_tag"),
            avoid_tags: format!("{prefix}_avoid_release_tag"),
            members: format!("{prefix}_members_tag"),
            rollout_lock: format!("{prefix}_rollout"),
        }
    }

    /// Member identifier, which doubles as the key of its record.
    pub fn member_id(member_name: &str, prefix: &str) -> String {
        format!("{member_name}:{prefix}")
    }
}
