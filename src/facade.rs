//! Per-record cache façade.
//!
//! Reads and writes values in a record's key namespace, tags every write with
//! the record's tag set, and forwards mutation events to the [`Invalidator`].

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;
use crate::engine::Invalidator;
use crate::error::CacheError;
use crate::events::MutationKind;
use crate::keys::CachePrefix;
use crate::record::Taggable;
use crate::store::CacheStore;
use crate::tags::{TagResolver, TagSet};

const METRIC_CACHE_HIT_TOTAL: &str = "record_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "record_cache_miss_total";
const METRIC_CACHE_BACKUP_HIT_TOTAL: &str = "record_cache_backup_hit_total";

/// Entry point for application code.
///
/// ```ignore
/// let cache = RecordCache::new(config, Arc::new(MemoryStore::default()));
/// cache.set(&post, "summary", &summary, None).await?;
/// let hit: Option<String> = cache.get(&post, "summary").await?;
/// ```
#[derive(Clone)]
pub struct RecordCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    backup: Option<Arc<dyn CacheStore>>,
    resolver: TagResolver,
    invalidator: Invalidator,
}

impl RecordCache {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            resolver: TagResolver::new(store.clone()),
            invalidator: Invalidator::new(&config, store.clone(), None),
            config,
            store,
            backup: None,
        }
    }

    /// Attach a secondary store consulted when the primary misses.
    pub fn with_backup(mut self, backup: Arc<dyn CacheStore>) -> Self {
        self.invalidator =
            Invalidator::new(&self.config, self.store.clone(), Some(backup.clone()));
        self.backup = Some(backup);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn prefix(&self, record: &dyn Taggable) -> Result<CachePrefix, CacheError> {
        CachePrefix::for_record(record)
    }

    pub async fn tags(&self, record: &dyn Taggable) -> Result<TagSet, CacheError> {
        self.resolver.tags(record).await
    }

    /// Read a value from the primary store.
    pub async fn get<T: DeserializeOwned>(
        &self,
        record: &dyn Taggable,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let full_key = CachePrefix::for_record(record)?.full_key(key);
        self.read_primary(&full_key).await?.map(decode).transpose()
    }

    /// Read a value, falling back to the backup store on a primary miss.
    ///
    /// A backup hit is written back to the primary under the record's
    /// current tag set.
    pub async fn get_with_backup<T: DeserializeOwned>(
        &self,
        record: &dyn Taggable,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let full_key = CachePrefix::for_record(record)?.full_key(key);
        if let Some(value) = self.read_primary(&full_key).await? {
            return decode(value).map(Some);
        }

        let Some(backup) = &self.backup else {
            return Ok(None);
        };
        let Some(value) = backup.get(&full_key).await? else {
            return Ok(None);
        };

        counter!(METRIC_CACHE_BACKUP_HIT_TOTAL).increment(1);
        debug!(key = %full_key, "Backfilling primary store from backup");

        let tags = self.resolver.tags(record).await?;
        self.store
            .set(&full_key, value.clone(), self.config.default_ttl(), &tags)
            .await?;
        decode(value).map(Some)
    }

    /// Store a value tagged with the record's tag set and hand it back.
    ///
    /// Without `ttl` the configured default applies; without either the
    /// entry lives until invalidated.
    pub async fn set<T: Serialize>(
        &self,
        record: &dyn Taggable,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<T, CacheError> {
        self.write(record, key, value, ttl, false).await
    }

    /// Like [`set`](Self::set), mirroring the value into the backup store.
    pub async fn set_with_backup<T: Serialize>(
        &self,
        record: &dyn Taggable,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<T, CacheError> {
        self.write(record, key, value, ttl, true).await
    }

    /// Remove one entry from both stores.
    pub async fn delete(&self, record: &dyn Taggable, key: &str) -> Result<(), CacheError> {
        let full_key = CachePrefix::for_record(record)?.full_key(key);
        self.store.delete(&full_key).await?;
        if let Some(backup) = &self.backup {
            backup.delete(&full_key).await?;
        }
        Ok(())
    }

    /// See [`Invalidator::on_mutation`].
    pub async fn on_mutation(
        &self,
        record: &dyn Taggable,
        kind: MutationKind,
    ) -> Result<Option<TagSet>, CacheError> {
        self.invalidator.on_mutation(record, kind).await
    }

    /// See [`Invalidator::invalidate`].
    pub async fn invalidate(&self, record: &dyn Taggable) -> Result<TagSet, CacheError> {
        self.invalidator.invalidate(record).await
    }

    /// See [`Invalidator::relation_changed`].
    pub async fn relation_changed(&self, owner: &dyn Taggable) -> Result<TagSet, CacheError> {
        self.invalidator.relation_changed(owner).await
    }

    async fn read_primary(&self, full_key: &str) -> Result<Option<Value>, CacheError> {
        let value = self.store.get(full_key).await?;
        match value {
            Some(_) => counter!(METRIC_CACHE_HIT_TOTAL).increment(1),
            None => counter!(METRIC_CACHE_MISS_TOTAL).increment(1),
        }
        Ok(value)
    }

    async fn write<T: Serialize>(
        &self,
        record: &dyn Taggable,
        key: &str,
        value: T,
        ttl: Option<Duration>,
        mirror: bool,
    ) -> Result<T, CacheError> {
        if !self.config.enabled {
            return Ok(value);
        }

        let full_key = CachePrefix::for_record(record)?.full_key(key);
        let tags = self.resolver.tags(record).await?;
        let encoded = serde_json::to_value(&value)?;
        let ttl = ttl.or_else(|| self.config.default_ttl());

        if mirror {
            if let Some(backup) = &self.backup {
                backup.set(&full_key, encoded.clone(), ttl, &tags).await?;
            }
        }
        self.store.set(&full_key, encoded, ttl, &tags).await?;

        Ok(value)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CacheError> {
    Ok(serde_json::from_value(value)?)
}
