//! fleet-health: verifies a canary after deploy.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker::verify(tag, asset)
//!   ├── burst: up to `retries` attempts, `delay` apart, overall deadline
//!   └── watch: one check per `interval` until the canary window ends
//!         └── CommandRunner (health-check command, per-attempt timeout)
//! ```
//!
//! Either phase failing fails the canary; the caller adds the tag to the
//! avoid set and rolls back.

pub mod checker;
pub mod error;

pub use checker::{HealthChecker, HealthPolicy, Verified};
pub use error::HealthCheckError;
