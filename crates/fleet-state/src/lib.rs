//! fleet-state: shared coordination state for the fleet canary releaser.
//!
//! Every node of the fleet talks to the same key/value store. This crate
//! owns the key layout and the protocol built on top of it: mutual
//! exclusion for canary and rollout attempts (atomic set-if-absent with a
//! TTL), the stable tag, the avoid set, and the member registry used for
//! rollout progress.
//!
//! # Architecture
//!
//! ```text
//! FleetState (locks, tags, members, install gate)
//!   └── Arc<dyn SharedStore>
//!         ├── RedisStore   (production, tokio connection manager)
//!         └── MemoryStore  (tests and multi-node simulations)
//! ```
//!
//! Keys are created lazily, refreshed by the control loops and left to
//! expire on their own; the only explicit deletions are canary lock
//! release after a promotion and pruning of departed members.

pub mod coordination;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod types;

pub use coordination::FleetState;
pub use error::{StateError, StateResult};
pub use keys::KeySpace;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{SharedStore, StoreFuture};
pub use types::*;
