//! Cache store contract and the bundled in-memory store.
//!
//! The crate never owns a storage format: every read, write and invalidation
//! goes through [`CacheStore`]. [`MemoryStore`] is an LRU-bounded in-process
//! implementation that simulates tag invalidation with a [`TagRegistry`].

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::lock::{rw_read, rw_write};
use crate::registry::TagRegistry;
use crate::tags::TagSet;

const SOURCE: &str = "record_cache::store";
const METRIC_CACHE_EVICT_TOTAL: &str = "record_cache_evict_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
    #[error("cache store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Key-value store with tag-based bulk invalidation.
///
/// A miss is `Ok(None)`; errors mean the store itself failed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl` when given, and mark
    /// it with `tags` for later bulk invalidation.
    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry marked with any of `tags`. Unknown tags are ignored.
    async fn invalidate_tags(&self, tags: &TagSet) -> Result<(), StoreError>;
}

struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process cache store.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredEntry>>,
    registry: TagRegistry,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            registry: TagRegistry::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.memory_capacity_non_zero())
    }

    /// Whether a live entry exists, without touching LRU order.
    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
        self.registry.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
        }

        entries.pop(key);
        self.registry.unregister(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<(), StoreError> {
        let entry = StoredEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        let mut entries = rw_write(&self.entries, SOURCE, "set");
        // `push` also hands back the old value when `key` was already present.
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                self.registry.unregister(&evicted);
                counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
            }
        }
        self.registry.register(key, tags);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        self.registry.unregister(key);
        Ok(())
    }

    async fn invalidate_tags(&self, tags: &TagSet) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_tags");
        for key in self.registry.take_tagged(tags) {
            entries.pop(&key);
        }
        Ok(())
    }
}
