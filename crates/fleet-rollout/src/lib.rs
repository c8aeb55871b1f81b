//! fleet-rollout: the two per-node control loops.
//!
//! Each loop is a `tick → decide → act` function over a shared
//! [`NodeContext`]; the daemon decides when to tick.
//!
//! # Canary
//!
//! ```text
//! report → snapshot → discover → gate → download → canary lock → deploy
//!   → verify ─┬─ ok:   stable tag, report, release lock      → Promoted
//!             └─ fail: avoid set, rollback (lock left to expire)
//! ```
//!
//! # Rollout
//!
//! ```text
//! report → stable tag → gate → download → rollout lock → deploy → progress
//! ```
//!
//! Steady-state conditions come back as outcome variants; only real
//! failures are [`CycleError`]s.

pub mod canary;
pub mod context;
pub mod error;
pub mod rollback;
pub mod rollout;
#[cfg(test)]
mod testkit;

pub use canary::{CanaryOutcome, CanaryRelease};
pub use context::{Hooks, NodeContext};
pub use error::{CycleError, CycleResult};
pub use rollback::{RollbackOutcome, rollback};
pub use rollout::{Rollout, RolloutOutcome};
