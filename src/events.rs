//! Mutation events.
//!
//! The persistence layer reports inserts, updates and deletes; the policy
//! decides which of them invalidate cached data.

use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::keys::CachePrefix;

/// Kind of row change reported by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which mutation kinds trigger invalidation. All three by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl MutationPolicy {
    /// Update and delete only; inserts leave existing entries alone.
    pub const UPDATE_DELETE: Self = Self {
        insert: false,
        update: true,
        delete: true,
    };

    pub fn fires_on(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::Insert => self.insert,
            MutationKind::Update => self.update,
            MutationKind::Delete => self.delete,
        }
    }
}

impl Default for MutationPolicy {
    fn default() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }
}

/// A mutation observed for one record, with identifiers for log correlation.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub id: Uuid,
    pub kind: MutationKind,
    pub record_type: String,
    pub prefix: CachePrefix,
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(kind: MutationKind, record_type: impl Into<String>, prefix: CachePrefix) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            record_type: record_type.into(),
            prefix,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
