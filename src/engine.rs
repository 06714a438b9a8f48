//! Invalidation engine.
//!
//! Turns a mutation of one record into a single bulk tag invalidation
//! covering the record and everything it declares as a cache relation.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, instrument};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::events::{MutationEvent, MutationKind, MutationPolicy};
use crate::keys::CachePrefix;
use crate::record::Taggable;
use crate::store::CacheStore;
use crate::tags::{TagResolver, TagSet, compute_tags};

const METRIC_INVALIDATION_TOTAL: &str = "record_cache_invalidation_total";
const METRIC_INVALIDATE_MS: &str = "record_cache_invalidate_ms";

/// Reacts to mutation events by invalidating tag sets.
///
/// # Usage
///
/// ```ignore
/// // From the persistence layer's after-update hook:
/// invalidator.on_mutation(&post, MutationKind::Update).await?;
/// ```
#[derive(Clone)]
pub struct Invalidator {
    enabled: bool,
    policy: MutationPolicy,
    store: Arc<dyn CacheStore>,
    backup: Option<Arc<dyn CacheStore>>,
    resolver: TagResolver,
}

impl Invalidator {
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn CacheStore>,
        backup: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            policy: config.mutation_policy(),
            resolver: TagResolver::new(store.clone()),
            store,
            backup,
        }
    }

    /// Handle a mutation reported by the persistence layer.
    ///
    /// Returns the invalidated tag set, or `None` when the cache is disabled
    /// or the policy ignores this kind of mutation.
    #[instrument(skip(self, record), fields(record_type = record.type_name()))]
    pub async fn on_mutation(
        &self,
        record: &dyn Taggable,
        kind: MutationKind,
    ) -> Result<Option<TagSet>, CacheError> {
        if !self.enabled {
            debug!(%kind, "Invalidation skipped: cache disabled");
            return Ok(None);
        }
        if !self.policy.fires_on(kind) {
            debug!(%kind, "Invalidation skipped: mutation kind not in policy");
            return Ok(None);
        }

        self.invalidate_for(record, kind).await.map(Some)
    }

    /// Invalidate a record's tag set regardless of policy.
    #[instrument(skip(self, record), fields(record_type = record.type_name()))]
    pub async fn invalidate(&self, record: &dyn Taggable) -> Result<TagSet, CacheError> {
        self.invalidate_for(record, MutationKind::Update).await
    }

    /// Handle a relation membership change that did not touch the owner's row.
    ///
    /// Drops every entry tagged with the owner and its memoized tag set, so
    /// the next write recomputes tags from the current relations.
    #[instrument(skip(self, owner), fields(record_type = owner.type_name()))]
    pub async fn relation_changed(&self, owner: &dyn Taggable) -> Result<TagSet, CacheError> {
        let tags = TagSet::of(CachePrefix::for_record(owner)?);
        if !self.enabled {
            return Ok(tags);
        }

        self.invalidate_tags(&tags).await?;
        self.resolver.forget(owner).await?;

        info!(tag_count = tags.len(), "Relation change invalidated owner");
        counter!(METRIC_INVALIDATION_TOTAL, "kind" => "relation").increment(1);
        Ok(tags)
    }

    async fn invalidate_for(
        &self,
        record: &dyn Taggable,
        kind: MutationKind,
    ) -> Result<TagSet, CacheError> {
        let started_at = Instant::now();
        let event = MutationEvent::new(
            kind,
            record.type_name(),
            CachePrefix::for_record(record)?,
        );

        // The memo is tagged with its own prefix, so the bulk call drops it.
        let tags = match self.resolver.cached(record).await? {
            Some(tags) => tags,
            None => compute_tags(record).await?,
        };
        self.invalidate_tags(&tags).await?;

        info!(
            event_id = %event.id,
            event_kind = %event.kind,
            event_record_type = %event.record_type,
            event_timestamp = %event.timestamp,
            prefix = %event.prefix,
            tag_count = tags.len(),
            "Record cache invalidated"
        );
        counter!(METRIC_INVALIDATION_TOTAL, "kind" => kind.as_str()).increment(1);
        histogram!(METRIC_INVALIDATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(tags)
    }

    async fn invalidate_tags(&self, tags: &TagSet) -> Result<(), CacheError> {
        self.store.invalidate_tags(tags).await?;
        if let Some(backup) = &self.backup {
            backup.invalidate_tags(tags).await?;
        }
        Ok(())
    }
}
