//! Domain types stored in, or derived from, the shared store.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_core::FleetConfig;

/// Per-member liveness record.
///
/// Field name kept as `CurrentVersion` on the wire so nodes running the
/// older releaser can share a store with this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(rename = "CurrentVersion")]
    pub current_version: String,
}

/// Verdict of the install gate shared by the canary and rollout loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallGate {
    /// The tag may be deployed here.
    Proceed,
    /// The node already runs this tag.
    AlreadyInstalled,
    /// The tag failed verification somewhere in the fleet.
    Avoided,
}

/// How many live members report a given tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RolloutProgress {
    pub installed: usize,
    pub total: usize,
}

impl RolloutProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.installed == self.total
    }
}

impl fmt::Display for RolloutProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.installed, self.total)
    }
}

/// TTLs for locks and member records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTtls {
    pub canary_lock: Duration,
    pub rollout_lock: Duration,
    pub member_record: Duration,
}

impl LockTtls {
    /// Derive TTLs from the configured windows and multipliers.
    ///
    /// Saturates instead of overflowing; `FleetConfig::validate` rejects
    /// products above `MAX_DURATION`.
    pub fn from_config(config: &FleetConfig) -> Self {
        let locks = &config.locks;
        Self {
            canary_lock: config
                .canary_rollout_window
                .saturating_mul(locks.canary_ttl_factor),
            rollout_lock: config.rollout_window.saturating_mul(locks.rollout_ttl_factor),
            member_record: config.rollout_window.saturating_mul(locks.member_ttl_factor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_record_wire_format() {
        let record = MemberRecord {
            current_version: "v1.2.3".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"CurrentVersion":"v1.2.3"}"#);
    }

    #[test]
    fn default_ttls_follow_windows() {
        let config = FleetConfig::default();
        let ttls = LockTtls::from_config(&config);
        assert_eq!(ttls.canary_lock, Duration::from_secs(600));
        assert_eq!(ttls.rollout_lock, Duration::from_secs(60));
        assert_eq!(ttls.member_record, Duration::from_secs(120));
    }

    #[test]
    fn oversized_factors_saturate() {
        let mut config = FleetConfig::default();
        config.rollout_window = Duration::MAX;
        config.locks.member_ttl_factor = 2;
        let ttls = LockTtls::from_config(&config);
        assert_eq!(ttls.member_record, Duration::MAX);
        assert_eq!(ttls.rollout_lock, Duration::MAX);
    }

    #[test]
    fn progress_display_and_completion() {
        let progress = RolloutProgress {
            installed: 3,
            total: 4,
        };
        assert_eq!(progress.to_string(), "3/4");
        assert!(!progress.is_complete());
        assert!(RolloutProgress { installed: 4, total: 4 }.is_complete());
        assert!(!RolloutProgress::default().is_complete());
    }
}
