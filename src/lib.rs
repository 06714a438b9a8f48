//! Tag-based cache invalidation for object-relational records.
//!
//! Every record gets a deterministic [`CachePrefix`] derived from its type and
//! primary key. Values cached for a record live under that prefix and are
//! tagged with the record's [`TagSet`]: its own prefix plus the prefixes of the
//! records reachable through its declared cache relations. When the
//! persistence layer reports an insert, update or delete, the record's tag set
//! is invalidated in one store call, dropping every entry that depended on it.
//!
//! ```ignore
//! let cache = RecordCache::new(settings.cache, Arc::new(MemoryStore::default()));
//!
//! cache.set(&post, "rendered", html, None).await?;
//! // ... a comment on the post is edited ...
//! cache.on_mutation(&comment, MutationKind::Update).await?;
//! assert!(cache.get::<String>(&post, "rendered").await?.is_none());
//! ```
//!
//! ## Configuration
//!
//! [`Settings::load`] reads an optional TOML file followed by
//! `RECORD_CACHE__*` environment variables; see [`config`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod facade;
pub mod keys;
mod lock;
pub mod record;
pub mod registry;
pub mod store;
pub mod tags;
pub mod telemetry;

pub use config::{CacheConfig, LoadError, LogFormat, LoggingSettings, Settings};
pub use engine::Invalidator;
pub use error::CacheError;
pub use events::{MutationEvent, MutationKind, MutationPolicy};
pub use facade::RecordCache;
pub use keys::CachePrefix;
pub use record::{PrefixSlot, PrimaryKey, Related, RelationError, Taggable};
pub use registry::TagRegistry;
pub use store::{CacheStore, MemoryStore, StoreError};
pub use tags::{TagResolver, TagSet, compute_tags};
