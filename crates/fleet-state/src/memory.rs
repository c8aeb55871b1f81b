//! In-memory SharedStore.
//!
//! Expiry runs on tokio's clock, so tests can pause time and advance it
//! past a TTL. Clones share the same data: hand one clone to each
//! simulated node and they coordinate exactly as nodes sharing a Redis.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{StateError, StateResult};
use crate::store::{SharedStore, StoreFuture};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StateError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a live key, `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.inner.entries.lock().ok()?;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Whether a live key exists.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .map(|entries| entries.get(key).is_some_and(|e| e.is_live(now)))
            .unwrap_or(false)
    }

    /// Lock the map after purging expired entries.
    fn entries(&self) -> StateResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StateError::Unavailable("memory store switched off".to_string()));
        }
        let mut entries = self
            .inner
            .entries
            .lock()
            .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries)
    }

    fn write_text(&self, key: &str, value: &str, ttl: Option<Duration>) -> StateResult<()> {
        let mut entries = self.entries()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }
}

impl SharedStore for MemoryStore {
    fn set_nx_px<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut entries = self.entries()?;
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Text(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let entries = self.entries()?;
            match entries.get(key) {
                None => Ok(None),
                Some(Entry {
                    value: Value::Text(text),
                    ..
                }) => Ok(Some(text.clone())),
                Some(_) => Err(StateError::WrongType(key.to_string())),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.write_text(key, value, None) })
    }

    fn set_px<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.write_text(key, value, Some(ttl)) })
    }

    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.entries()?.remove(key).is_some()) })
    }

    fn sadd<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries()?;
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    Ok(())
                }
                Value::Text(_) => Err(StateError::WrongType(key.to_string())),
            }
        })
    }

    fn smembers<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let entries = self.entries()?;
            match entries.get(key) {
                None => Ok(Vec::new()),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => Ok(set.iter().cloned().collect()),
                Some(_) => Err(StateError::WrongType(key.to_string())),
            }
        })
    }

    fn srem<'a>(&'a self, key: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries()?;
            let emptied = match entries.get_mut(key) {
                None => return Ok(()),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => {
                    for member in members {
                        set.remove(member);
                    }
                    set.is_empty()
                }
                Some(_) => return Err(StateError::WrongType(key.to_string())),
            };
            // Redis drops a set once its last member goes.
            if emptied {
                entries.remove(key);
            }
            Ok(())
        })
    }
}
