//! Bidirectional tag registry.
//!
//! Secondary index for stores without native tag support: tracks which full
//! keys carry which tags so a tag set can be invalidated in one pass.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::keys::CachePrefix;
use crate::lock::{rw_read, rw_write};
use crate::tags::TagSet;

const SOURCE: &str = "record_cache::registry";

#[derive(Default)]
struct Maps {
    /// Maps tags to all keys stored with them
    tag_to_keys: HashMap<CachePrefix, HashSet<String>>,
    /// Maps keys to the tags they were stored with
    key_to_tags: HashMap<String, TagSet>,
}

impl Maps {
    fn unregister(&mut self, key: &str) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in &tags {
            if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(tag);
                }
            }
        }
    }
}

/// Tracks tag → keys and key → tags mappings.
pub struct TagRegistry {
    maps: RwLock<Maps>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Register a key with the tags it was stored under.
    ///
    /// Replaces whatever tags the key carried before.
    pub fn register(&self, key: &str, tags: &TagSet) {
        let mut maps = rw_write(&self.maps, SOURCE, "register");
        maps.unregister(key);
        if tags.is_empty() {
            return;
        }

        for tag in tags {
            maps.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        maps.key_to_tags.insert(key.to_string(), tags.clone());
    }

    /// Remove a key and clean up its tag mappings.
    ///
    /// Called when an entry is deleted, expires, or is evicted.
    pub fn unregister(&self, key: &str) {
        rw_write(&self.maps, SOURCE, "unregister").unregister(key);
    }

    /// Remove every key carrying any of `tags`.
    ///
    /// Returns the affected keys; they are fully unregistered, including
    /// their mappings under tags outside `tags`.
    pub fn take_tagged(&self, tags: &TagSet) -> HashSet<String> {
        let mut maps = rw_write(&self.maps, SOURCE, "take_tagged");

        let mut affected = HashSet::new();
        for tag in tags {
            if let Some(keys) = maps.tag_to_keys.remove(tag) {
                affected.extend(keys);
            }
        }
        for key in &affected {
            maps.unregister(key);
        }

        affected
    }

    /// Get all keys stored under a tag.
    pub fn keys_for_tag(&self, tag: &CachePrefix) -> HashSet<String> {
        rw_read(&self.maps, SOURCE, "keys_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Get the tags a key was stored under.
    pub fn tags_for_key(&self, key: &str) -> TagSet {
        rw_read(&self.maps, SOURCE, "tags_for_key")
            .key_to_tags
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut maps = rw_write(&self.maps, SOURCE, "clear");
        maps.tag_to_keys.clear();
        maps.key_to_tags.clear();
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "tag_count").tag_to_keys.len()
    }

    /// Number of tagged keys.
    pub fn key_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "key_count").key_to_tags.len()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
