use thiserror::Error;

use crate::record::RelationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("record of type `{type_name}` has no primary key; persist it before caching")]
    MissingPrimaryKey { type_name: String },
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to resolve relation `{relation}`: {source}")]
    Relation {
        relation: String,
        #[source]
        source: RelationError,
    },
    #[error("cache value codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CacheError {
    pub fn missing_primary_key(type_name: impl Into<String>) -> Self {
        Self::MissingPrimaryKey {
            type_name: type_name.into(),
        }
    }

    pub fn relation(relation: impl Into<String>, source: RelationError) -> Self {
        Self::Relation {
            relation: relation.into(),
            source,
        }
    }
}
