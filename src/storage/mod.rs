//! Provider seams.
//!
//! The core never talks to Elasticsearch or Redis directly; it goes through
//! these traits so the same logic runs against the real services
//! ([`elastic::ElasticClient`], [`redis_store::RedisStore`]) or the in-process
//! [`memory`] stores.

pub mod elastic;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ProviderResult;
use crate::models::{FileHit, SearchResponse, Tag, TagCountEntry};
use crate::query::SearchRequest;

/// Hash-map primitives of a key-value cache.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn exists(&self, key: &str) -> ProviderResult<bool>;
    async fn hget(&self, key: &str, field: &str) -> ProviderResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> ProviderResult<()>;
    async fn hgetall(&self, key: &str) -> ProviderResult<HashMap<String, String>>;
    async fn del(&self, key: &str) -> ProviderResult<()>;

    /// Writes every field, then the optional TTL, as one atomic step: either
    /// the whole hash appears or nothing does.
    async fn hset_all(&self, key: &str, entries: &[(String, String)], ttl: Option<Duration>) -> ProviderResult<()>;

    /// Adds `delta` to a counter field, but only while the hash exists.
    /// A field that drops to zero or below is removed. Returns the new
    /// count, or `None` when the hash is absent and nothing was written.
    async fn adjust_count(&self, key: &str, field: &str, delta: i64) -> ProviderResult<Option<i64>>;
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<SearchResponse>;

    /// Looks up one file by id, without its extracted text.
    async fn get_file(&self, file_id: &str) -> ProviderResult<Option<FileHit>>;
}

/// Authoritative source of tag counts.
#[async_trait]
pub trait TagAggregator: Send + Sync {
    async fn tag_stats(&self) -> ProviderResult<Vec<TagCountEntry>>;
}

/// Whether an authoritative tag write changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagChange {
    Applied,
    Unchanged,
}

/// Authoritative per-file tag writes. Both calls are idempotent; the file
/// must exist or `ProviderError::NotFound` is returned.
#[async_trait]
pub trait TagMutator: Send + Sync {
    async fn add_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange>;
    async fn remove_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange>;
}

#[async_trait]
pub trait FileVisibility: Send + Sync {
    async fn hide(&self, file_id: &str) -> ProviderResult<()>;
    async fn unhide(&self, file_id: &str) -> ProviderResult<()>;
}
