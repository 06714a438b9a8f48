//! Tag sets and the tag set resolver.
//!
//! A record's tag set is its own prefix plus the prefix of every record
//! reachable through one of its declared cache relations. Propagation is one
//! level deep: related records cover further depth through their own tags.

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::keys::CachePrefix;
use crate::record::Taggable;
use crate::store::CacheStore;

/// Ordered set of prefixes invalidated together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<CachePrefix>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag set holding a single prefix.
    pub fn of(prefix: CachePrefix) -> Self {
        let mut tags = Self::new();
        tags.insert(prefix);
        tags
    }

    pub fn insert(&mut self, prefix: CachePrefix) -> bool {
        self.0.insert(prefix)
    }

    pub fn contains(&self, prefix: &CachePrefix) -> bool {
        self.0.contains(prefix)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, CachePrefix> {
        self.0.iter()
    }
}

impl FromIterator<CachePrefix> for TagSet {
    fn from_iter<I: IntoIterator<Item = CachePrefix>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<CachePrefix> for TagSet {
    fn extend<I: IntoIterator<Item = CachePrefix>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a CachePrefix;
    type IntoIter = btree_set::Iter<'a, CachePrefix>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for TagSet {
    type Item = CachePrefix;
    type IntoIter = btree_set::IntoIter<CachePrefix>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Walk the declared relations of `record` and collect its tag set.
///
/// Related records that are not persisted yet are skipped; relation load
/// failures propagate.
pub async fn compute_tags(record: &dyn Taggable) -> Result<TagSet, CacheError> {
    let mut tags = TagSet::of(CachePrefix::for_record(record)?);

    for relation in record.cache_relations() {
        let related = record
            .load_relation(relation)
            .await
            .map_err(|source| CacheError::relation(*relation, source))?;

        for other in related.records() {
            match CachePrefix::for_record(&**other) {
                Ok(prefix) => {
                    tags.insert(prefix);
                }
                Err(CacheError::MissingPrimaryKey { type_name }) => {
                    warn!(
                        owner = record.type_name(),
                        relation = *relation,
                        related_type = %type_name,
                        "Skipping related record without primary key"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(tags)
}

/// Resolves tag sets, memoizing them in the cache store.
///
/// The memo lives at `{prefix}#tags` with no expiration and is itself stored
/// under every tag it lists, so invalidating any member drops it.
#[derive(Clone)]
pub struct TagResolver {
    store: Arc<dyn CacheStore>,
}

impl TagResolver {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Memoized tag set of `record`, computed on first use.
    pub async fn tags(&self, record: &dyn Taggable) -> Result<TagSet, CacheError> {
        if let Some(tags) = self.cached(record).await? {
            return Ok(tags);
        }

        let tags = compute_tags(record).await?;
        let memo_key = CachePrefix::for_record(record)?.tags_key();
        self.store
            .set(&memo_key, serde_json::to_value(&tags)?, None, &tags)
            .await?;
        Ok(tags)
    }

    /// Memoized tag set of `record`, if a usable one is stored.
    ///
    /// Empty or unreadable memos count as absent.
    pub async fn cached(&self, record: &dyn Taggable) -> Result<Option<TagSet>, CacheError> {
        let memo_key = CachePrefix::for_record(record)?.tags_key();
        let Some(memo) = self.store.get(&memo_key).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<TagSet>(memo) {
            Ok(tags) if !tags.is_empty() => {
                debug!(
                    record_type = record.type_name(),
                    tag_count = tags.len(),
                    "Tag set memo hit"
                );
                Ok(Some(tags))
            }
            Ok(_) => Ok(None),
            Err(err) => {
                warn!(
                    record_type = record.type_name(),
                    key = %memo_key,
                    error = %err,
                    "Discarding unreadable tag set memo"
                );
                Ok(None)
            }
        }
    }

    /// Drop the memoized tag set so the next lookup walks relations again.
    pub async fn forget(&self, record: &dyn Taggable) -> Result<(), CacheError> {
        let prefix = CachePrefix::for_record(record)?;
        self.store.delete(&prefix.tags_key()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::record::{PrimaryKey, Related, RelationError};
    use crate::store::MemoryStore;

    struct Node {
        type_name: &'static str,
        id: Option<u32>,
        children: Mutex<Vec<Arc<dyn Taggable>>>,
        loads: AtomicUsize,
    }

    impl Node {
        fn new(type_name: &'static str, id: Option<u32>) -> Self {
            Self {
                type_name,
                id,
                children: Mutex::new(Vec::new()),
                loads: AtomicUsize::new(0),
            }
        }

        fn with_children(self, children: Vec<Arc<dyn Taggable>>) -> Self {
            *self.children.lock().unwrap() = children;
            self
        }
    }

    #[async_trait]
    impl Taggable for Node {
        fn type_name(&self) -> &str {
            self.type_name
        }

        fn primary_key(&self) -> Option<PrimaryKey> {
            self.id.map(PrimaryKey::single)
        }

        fn cache_relations(&self) -> &'static [&'static str] {
            &["children", "blob"]
        }

        async fn load_relation(&self, name: &str) -> Result<Related, RelationError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match name {
                "children" => Ok(Related::Many(self.children.lock().unwrap().clone())),
                "blob" => Ok(Related::Opaque),
                _ => Err(RelationError::unknown(self.type_name, name)),
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Taggable for Broken {
        fn type_name(&self) -> &str {
            "Broken"
        }

        fn primary_key(&self) -> Option<PrimaryKey> {
            Some(PrimaryKey::single(1))
        }

        fn cache_relations(&self) -> &'static [&'static str] {
            &["missing"]
        }
    }

    fn prefix(record: &dyn Taggable) -> CachePrefix {
        CachePrefix::for_record(record).expect("prefix")
    }

    #[tokio::test]
    async fn record_without_relations_tags_itself() {
        let leaf = Node::new("Leaf", Some(1));
        let tags = compute_tags(&leaf).await.expect("tags");
        assert_eq!(tags, TagSet::of(prefix(&leaf)));
    }

    #[tokio::test]
    async fn relations_contribute_one_level() {
        let grandchild: Arc<dyn Taggable> = Arc::new(Node::new("Leaf", Some(3)));
        let child: Arc<dyn Taggable> =
            Arc::new(Node::new("Child", Some(2)).with_children(vec![grandchild.clone()]));
        let root = Node::new("Root", Some(1)).with_children(vec![child.clone()]);

        let tags = compute_tags(&root).await.expect("tags");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&prefix(&root)));
        assert!(tags.contains(&prefix(&*child)));
        assert!(!tags.contains(&prefix(&*grandchild)));
    }

    #[tokio::test]
    async fn unsaved_related_records_are_skipped() {
        let unsaved: Arc<dyn Taggable> = Arc::new(Node::new("Child", None));
        let root = Node::new("Root", Some(1)).with_children(vec![unsaved]);

        let tags = compute_tags(&root).await.expect("tags");
        assert_eq!(tags, TagSet::of(prefix(&root)));
    }

    #[tokio::test]
    async fn relation_failure_propagates() {
        let err = compute_tags(&Broken).await.expect_err("unknown relation");
        assert!(matches!(err, CacheError::Relation { ref relation, .. } if relation == "missing"));
    }

    #[tokio::test]
    async fn resolver_memoizes_tag_set() {
        let store = Arc::new(MemoryStore::default());
        let resolver = TagResolver::new(store.clone());
        let root = Node::new("Root", Some(1));

        let first = resolver.tags(&root).await.expect("tags");
        let second = resolver.tags(&root).await.expect("tags");

        assert_eq!(first, second);
        assert_eq!(root.loads.load(Ordering::SeqCst), 2);
        assert!(store.contains(&prefix(&root).tags_key()));
    }

    #[tokio::test]
    async fn forget_forces_recomputation() {
        let store = Arc::new(MemoryStore::default());
        let resolver = TagResolver::new(store);
        let root = Node::new("Root", Some(1));

        resolver.tags(&root).await.expect("tags");
        let child: Arc<dyn Taggable> = Arc::new(Node::new("Child", Some(2)));
        *root.children.lock().unwrap() = vec![child.clone()];

        // Stale until forgotten.
        assert_eq!(resolver.tags(&root).await.expect("tags").len(), 1);

        resolver.forget(&root).await.expect("forget");
        let tags = resolver.tags(&root).await.expect("tags");
        assert!(tags.contains(&prefix(&*child)));
    }

    #[tokio::test]
    async fn unreadable_memo_is_recomputed() {
        let store = Arc::new(MemoryStore::default());
        let resolver = TagResolver::new(store.clone());
        let root = Node::new("Root", Some(1));

        store
            .set(
                &prefix(&root).tags_key(),
                serde_json::json!({"not": "a tag set"}),
                None,
                &TagSet::new(),
            )
            .await
            .expect("set");

        let tags = resolver.tags(&root).await.expect("tags");
        assert_eq!(tags, TagSet::of(prefix(&root)));
    }

    #[tokio::test]
    async fn empty_memo_is_recomputed_and_stored_again() {
        let store = Arc::new(MemoryStore::default());
        let resolver = TagResolver::new(store.clone());
        let root = Node::new("Root", Some(1));
        let memo_key = prefix(&root).tags_key();

        store
            .set(&memo_key, serde_json::json!([]), None, &TagSet::new())
            .await
            .expect("set");
        assert!(resolver.cached(&root).await.expect("cached").is_none());

        let tags = resolver.tags(&root).await.expect("tags");
        assert_eq!(tags, TagSet::of(prefix(&root)));

        let stored: TagSet =
            serde_json::from_value(store.get(&memo_key).await.expect("get").expect("memo"))
                .expect("decode");
        assert_eq!(stored, tags);
        assert!(store.registry().keys_for_tag(&prefix(&root)).contains(&memo_key));
    }

    #[tokio::test]
    async fn cached_never_writes_a_memo() {
        let store = Arc::new(MemoryStore::default());
        let resolver = TagResolver::new(store.clone());
        let root = Node::new("Root", Some(1));

        assert!(resolver.cached(&root).await.expect("cached").is_none());
        assert!(store.is_empty());
        assert_eq!(root.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tag_set_serializes_as_sorted_array() {
        let a = CachePrefix::compute("A", &PrimaryKey::single(1));
        let b = CachePrefix::compute("B", &PrimaryKey::single(1));
        let tags: TagSet = [b.clone(), a.clone(), a.clone()].into_iter().collect();

        let value = serde_json::to_value(&tags).expect("serialize");
        let array = value.as_array().expect("array");
        assert_eq!(array.len(), 2);

        let decoded: TagSet = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, tags);
    }
}
