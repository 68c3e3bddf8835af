//! Cached tag → file-count index.
//!
//! The counts live in one key-value hash (`tags`, field `"{type} {name}"`)
//! and are an eventually-consistent projection of the search index:
//!
//! ```text
//! Uninitialized --read--> Hydrating --aggregation stored--> Hydrated
//!       ^                                                      |
//!       +------------------- flush() / TTL expiry -------------+
//! ```
//!
//! Writes always hit the authoritative index first and only then adjust a
//! hydrated cache, so a cached count is never ahead of the index. The hash
//! is written in one atomic step and counters only move while it exists, so
//! a failed or expired hydration never leaves a partial hash behind. Updates
//! of the same tag from several writers may still leave the count behind;
//! `flush()` (or the optional TTL) drops the hash and the next read rebuilds
//! it from the aggregation.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::ProviderResult;
use crate::models::{Tag, TagCountEntry};
use crate::storage::{KvStore, TagAggregator, TagChange, TagMutator};

pub const TAGS_HASH_NAME: &str = "tags";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Hydrating,
    Hydrated,
}

/// Clears the hydrating flag however hydration ends.
struct HydratingFlag<'a>(&'a AtomicBool);

impl<'a> HydratingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for HydratingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TagCache {
    store: Arc<dyn KvStore>,
    aggregator: Arc<dyn TagAggregator>,
    mutator: Arc<dyn TagMutator>,
    ttl: Option<Duration>,
    hydration: Mutex<()>,
    hydrating: AtomicBool,
}

impl TagCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        aggregator: Arc<dyn TagAggregator>,
        mutator: Arc<dyn TagMutator>,
    ) -> Self {
        Self {
            store,
            aggregator,
            mutator,
            ttl: None,
            hydration: Mutex::new(()),
            hydrating: AtomicBool::new(false),
        }
    }

    /// Expire the hydrated hash after `ttl`, forcing a periodic rebuild.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn state(&self) -> ProviderResult<CacheState> {
        if self.store.exists(TAGS_HASH_NAME).await? {
            return Ok(CacheState::Hydrated);
        }
        Ok(if self.hydrating.load(Ordering::Acquire) {
            CacheState::Hydrating
        } else {
            CacheState::Uninitialized
        })
    }

    /// Tags sorted by file count, most used first.
    pub async fn get_tags(&self) -> ProviderResult<Vec<TagCountEntry>> {
        self.hydrate().await?;
        self.read_sorted().await
    }

    pub async fn add_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<Vec<TagCountEntry>> {
        if self.mutator.add_tag(file_id, tag).await? == TagChange::Applied {
            self.adjust(tag, 1).await?;
        }
        self.get_tags().await
    }

    pub async fn remove_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<Vec<TagCountEntry>> {
        if self.mutator.remove_tag(file_id, tag).await? == TagChange::Applied {
            self.adjust(tag, -1).await?;
        }
        self.get_tags().await
    }

    /// Forgets every cached count; the next read rehydrates.
    pub async fn flush(&self) -> ProviderResult<()> {
        let _guard = self.hydration.lock().await;
        self.store.del(TAGS_HASH_NAME).await?;
        tracing::info!("Tag cache flushed");
        Ok(())
    }

    /// Moves a hydrated count; a cold cache is left for hydration to fill.
    async fn adjust(&self, tag: &Tag, delta: i64) -> ProviderResult<()> {
        let field = tag.cache_field();
        match self.store.adjust_count(TAGS_HASH_NAME, &field, delta).await? {
            Some(count) if count <= 0 => tracing::debug!("tag '{}' no longer used, dropped from cache", field),
            Some(count) => tracing::debug!("tag '{}' now on {} files", field, count),
            None => tracing::debug!("tag cache cold, '{}' not counted", field),
        }
        Ok(())
    }

    async fn is_hydrated(&self) -> ProviderResult<bool> {
        self.store.exists(TAGS_HASH_NAME).await
    }

    async fn hydrate(&self) -> ProviderResult<CacheState> {
        if self.is_hydrated().await? {
            return Ok(CacheState::Hydrated);
        }

        let _guard = self.hydration.lock().await;
        // Someone else may have finished while we waited for the lock.
        if self.is_hydrated().await? {
            return Ok(CacheState::Hydrated);
        }
        let _flag = HydratingFlag::raise(&self.hydrating);

        let tags = self.aggregator.tag_stats().await?;
        if tags.is_empty() {
            tracing::debug!("No tags indexed yet, tag cache left empty");
            return Ok(CacheState::Uninitialized);
        }

        let entries: Vec<(String, String)> = tags
            .iter()
            .map(|tag| (format!("{} {}", tag.tag_type, tag.name), tag.files_count.to_string()))
            .collect();
        self.store.hset_all(TAGS_HASH_NAME, &entries, self.ttl).await?;

        tracing::info!("Tag cache hydrated with {} tags", tags.len());
        Ok(CacheState::Hydrated)
    }

    async fn read_sorted(&self) -> ProviderResult<Vec<TagCountEntry>> {
        let rows = self.store.hgetall(TAGS_HASH_NAME).await?;
        let mut tags: Vec<TagCountEntry> = rows
            .iter()
            .filter_map(|(field, value)| TagCountEntry::from_cache_row(field, value))
            .collect();
        tags.sort_by(|a, b| {
            (Reverse(a.files_count), a.tag_type, &a.name).cmp(&(Reverse(b.files_count), b.tag_type, &b.name))
        });
        Ok(tags)
    }
}
