//! Record capability contract.
//!
//! The persistence layer owns the records; this crate only needs a stable
//! identity, the declared cache relations, and a way to resolve them.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::CachePrefix;

/// Delimiter placed between composite primary-key parts before hashing.
pub const COMPOSITE_KEY_DELIMITER: &str = "-";

/// Primary key of a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    /// Single-column key.
    Single(String),
    /// Multi-column key, in declaration order.
    Composite(Vec<String>),
}

impl PrimaryKey {
    pub fn single(value: impl ToString) -> Self {
        Self::Single(value.to_string())
    }

    pub fn composite<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self::Composite(parts.into_iter().map(|part| part.to_string()).collect())
    }

    /// Joined form used as hash input.
    pub fn joined(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Composite(parts) => parts.join(COMPOSITE_KEY_DELIMITER),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Lazily filled per-instance prefix memo.
///
/// Embed one in a record type and return it from [`Taggable::prefix_slot`]
/// so the prefix is hashed at most once per instance.
pub type PrefixSlot = OnceLock<CachePrefix>;

/// Resolved value of a declared relation.
#[derive(Clone, Default)]
pub enum Related {
    /// Relation resolved to nothing (null foreign key, empty join).
    #[default]
    Empty,
    /// Single related record.
    One(Arc<dyn Taggable>),
    /// Collection of related records.
    Many(Vec<Arc<dyn Taggable>>),
    /// Relation resolved to a value that is not a record. Contributes no tags.
    Opaque,
}

impl Related {
    pub fn one(record: impl Taggable + 'static) -> Self {
        Self::One(Arc::new(record))
    }

    /// Records carried by this relation value.
    pub fn records(&self) -> &[Arc<dyn Taggable>] {
        match self {
            Self::One(record) => std::slice::from_ref(record),
            Self::Many(records) => records,
            Self::Empty | Self::Opaque => &[],
        }
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::One(record) => write!(f, "One({})", record.type_name()),
            Self::Many(records) => write!(f, "Many(len={})", records.len()),
            Self::Opaque => f.write_str("Opaque"),
        }
    }
}

/// Failure reported by the record layer while resolving a relation.
#[derive(Debug, Error)]
pub enum RelationError {
    #[error("relation `{name}` is not defined on `{type_name}`")]
    Unknown { type_name: String, name: String },
    #[error("failed to load relation: {message}")]
    Load { message: String },
}

impl RelationError {
    pub fn unknown(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Unknown {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
        }
    }
}

/// Capability implemented by every record type whose cache entries are tagged.
#[async_trait]
pub trait Taggable: Send + Sync {
    /// Stable name of the concrete record type. Separates prefix namespaces.
    fn type_name(&self) -> &str;

    /// Primary key, or `None` while the record is not yet persisted.
    fn primary_key(&self) -> Option<PrimaryKey>;

    /// Relations whose records contribute to this record's tag set.
    fn cache_relations(&self) -> &'static [&'static str] {
        &[]
    }

    /// Resolve a declared relation. May lazily load from the database.
    async fn load_relation(&self, name: &str) -> Result<Related, RelationError> {
        Err(RelationError::unknown(self.type_name(), name))
    }

    /// Optional per-instance prefix memo.
    fn prefix_slot(&self) -> Option<&PrefixSlot> {
        None
    }
}
