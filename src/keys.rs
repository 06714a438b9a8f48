//! Cache key definitions.
//!
//! Defines `CachePrefix`, the per-record fingerprint used both as a key
//! namespace and as an invalidation tag.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::record::{PrimaryKey, Taggable};

/// Namespace marker mixed into every prefix digest.
const PREFIX_NAMESPACE: &str = ".cache-prefix.";
/// Separator between a prefix and the logical key.
pub const KEY_SEPARATOR: char = '.';
/// Separator of the tag set memo key. Never produced by [`CachePrefix::full_key`].
pub const MEMO_SEPARATOR: char = '#';
/// Suffix under which a record's tag set is memoized.
pub const TAGS_SUFFIX: &str = "tags";
/// Digest bytes kept; hex-encoded this yields 32 characters.
const PREFIX_BYTES: usize = 16;

/// Deterministic fingerprint of `(record type, primary key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachePrefix(String);

impl CachePrefix {
    /// Hash a type name and primary key into a prefix.
    pub fn compute(type_name: &str, key: &PrimaryKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.update(PREFIX_NAMESPACE.as_bytes());
        hasher.update(key.joined().as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..PREFIX_BYTES]))
    }

    /// Prefix of a persisted record.
    ///
    /// Records that expose a [`PrefixSlot`](crate::record::PrefixSlot) get the
    /// digest computed once and reused for the instance lifetime.
    pub fn for_record(record: &dyn Taggable) -> Result<Self, CacheError> {
        if let Some(prefix) = record.prefix_slot().and_then(|slot| slot.get()) {
            return Ok(prefix.clone());
        }

        let key = record
            .primary_key()
            .ok_or_else(|| CacheError::missing_primary_key(record.type_name()))?;
        let prefix = Self::compute(record.type_name(), &key);

        match record.prefix_slot() {
            Some(slot) => Ok(slot.get_or_init(|| prefix).clone()),
            None => Ok(prefix),
        }
    }

    /// Full store key for a logical key in this namespace.
    pub fn full_key(&self, logical: &str) -> String {
        format!("{}{KEY_SEPARATOR}{logical}", self.0)
    }

    /// Store key of the memoized tag set, outside the logical key space.
    pub fn tags_key(&self) -> String {
        format!("{}{MEMO_SEPARATOR}{TAGS_SUFFIX}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CachePrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
