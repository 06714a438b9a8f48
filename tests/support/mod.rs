//! Fixture records shared by the integration tests.
//!
//! `Post` declares `comments`, `tags` and `author` as cache relations,
//! `Comment` points back at its post, `Tag` declares nothing.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use record_cache::{
    CacheStore, PrefixSlot, PrimaryKey, Related, RelationError, StoreError, TagSet, Taggable,
};
use serde_json::Value;

pub struct Post {
    pub id: Option<u32>,
    pub comments: Mutex<Vec<Arc<Comment>>>,
    pub tags: Mutex<Vec<Arc<Tag>>>,
    slot: PrefixSlot,
}

impl Post {
    pub fn new(id: u32) -> Self {
        Self {
            id: Some(id),
            comments: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            slot: PrefixSlot::new(),
        }
    }

    pub fn unsaved() -> Self {
        Self {
            id: None,
            ..Self::new(0)
        }
    }

    pub fn with_comments(self, comments: Vec<Arc<Comment>>) -> Self {
        *self.comments.lock().unwrap() = comments;
        self
    }

    pub fn with_tags(self, tags: Vec<Arc<Tag>>) -> Self {
        *self.tags.lock().unwrap() = tags;
        self
    }
}

#[async_trait]
impl Taggable for Post {
    fn type_name(&self) -> &str {
        "Post"
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        self.id.map(PrimaryKey::single)
    }

    fn cache_relations(&self) -> &'static [&'static str] {
        &["comments", "tags", "author"]
    }

    async fn load_relation(&self, name: &str) -> Result<Related, RelationError> {
        match name {
            "comments" => Ok(Related::Many(
                self.comments
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|comment| comment.clone() as Arc<dyn Taggable>)
                    .collect(),
            )),
            "tags" => Ok(Related::Many(
                self.tags
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|tag| tag.clone() as Arc<dyn Taggable>)
                    .collect(),
            )),
            // Author is a plain value object in this fixture.
            "author" => Ok(Related::Opaque),
            other => Err(RelationError::unknown("Post", other)),
        }
    }

    fn prefix_slot(&self) -> Option<&PrefixSlot> {
        Some(&self.slot)
    }
}

/// Freshly loaded copy of a post, as an ORM would hand back from a relation.
pub struct PostRef(pub u32);

impl Taggable for PostRef {
    fn type_name(&self) -> &str {
        "Post"
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        Some(PrimaryKey::single(self.0))
    }
}

pub struct Comment {
    pub id: u32,
    pub post_id: Option<u32>,
}

impl Comment {
    pub fn new(id: u32, post_id: u32) -> Self {
        Self {
            id,
            post_id: Some(post_id),
        }
    }
}

#[async_trait]
impl Taggable for Comment {
    fn type_name(&self) -> &str {
        "Comment"
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        Some(PrimaryKey::single(self.id))
    }

    fn cache_relations(&self) -> &'static [&'static str] {
        &["post"]
    }

    async fn load_relation(&self, name: &str) -> Result<Related, RelationError> {
        match name {
            "post" => Ok(self
                .post_id
                .map(|id| Related::one(PostRef(id)))
                .unwrap_or_default()),
            other => Err(RelationError::unknown("Comment", other)),
        }
    }
}

pub struct Tag(pub u32);

impl Taggable for Tag {
    fn type_name(&self) -> &str {
        "Tag"
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        Some(PrimaryKey::single(self.0))
    }
}

/// Join row keyed by both sides.
pub struct PostTag {
    pub post_id: u32,
    pub tag_id: u32,
}

impl Taggable for PostTag {
    fn type_name(&self) -> &str {
        "PostTag"
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        Some(PrimaryKey::composite([self.post_id, self.tag_id]))
    }
}

/// Store whose backend is always down.
#[derive(Default)]
pub struct UnavailableStore;

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn set(
        &self,
        _key: &str,
        _value: Value,
        _ttl: Option<Duration>,
        _tags: &TagSet,
    ) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn invalidate_tags(&self, _tags: &TagSet) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
}
