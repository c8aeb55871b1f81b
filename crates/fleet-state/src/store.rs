//! SharedStore: the key/value primitives every fleet node shares.
//!
//! Anything offering an atomic conditional set with expiry, plain
//! get/set, server-side set operations and key expiry can back the
//! coordination state. Two backends ship with this crate: Redis for
//! production and an in-memory store for tests and simulations.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::StateResult;

/// Boxed future returned by every store call.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StateResult<T>> + Send + 'a>>;

/// Key/value store shared by every node of the fleet.
pub trait SharedStore: Send + Sync {
    /// Set `key = value` with a TTL only if `key` is absent.
    ///
    /// Returns true if this call created the key. Must be atomic: either
    /// the key exists afterwards with the TTL applied, or nothing changed.
    fn set_nx_px<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration)
    -> StoreFuture<'a, bool>;

    /// Read a string value.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Write a string value with no expiry.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

    /// Write a string value that expires after `ttl`.
    fn set_px<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Delete a key. Returns true if it existed.
    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Add a member to the set at `key`.
    fn sadd<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()>;

    /// All members of the set at `key` (empty if absent).
    fn smembers<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// Remove members from the set at `key`.
    fn srem<'a>(&'a self, key: &'a str, members: &'a [String]) -> StoreFuture<'a, ()>;
}
