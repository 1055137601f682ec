//! Storage interface for the worker's single KV namespace.
//!
//! The contract mirrors what edge KV stores offer: per-key linearizability,
//! optional TTLs, lexicographic prefix listing, and nothing resembling a
//! multi-key transaction. Callers that need cross-key consistency order
//! their writes instead.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("kv binding unavailable")]
    Unavailable,
    #[error("kv operation failed: {0}")]
    Backend(String),
}

/// Key-value storage implemented by deployment backends.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` when the key is absent or its TTL elapsed.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Store a value, optionally expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<()>;

    /// Remove a key, reporting whether a live entry was removed. Deleting
    /// an absent or expired key is not an error; it returns `false`.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// List live keys with the given prefix in lexicographic order.
    async fn list(&self, prefix: &str) -> KvResult<Vec<String>>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store backing tests and single-process dev deployments.
/// Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("kv mutex");
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries
            .lock()
            .expect("kv mutex")
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let now = Instant::now();
        let removed = self.entries.lock().expect("kv mutex").remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn list(&self, prefix: &str) -> KvResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("kv mutex");
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
