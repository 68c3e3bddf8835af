use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{KvStore, TagAggregator, TagChange, TagMutator};
use crate::error::{ProviderError, ProviderResult};
use crate::models::{Tag, TagCountEntry, TagType};

#[derive(Default)]
struct Hashes {
    values: HashMap<String, HashMap<String, String>>,
    deadlines: HashMap<String, Instant>,
}

impl Hashes {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.deadlines.remove(&key);
            self.values.remove(&key);
        }
    }

    /// Drops a hash that lost its last field, the way Redis does.
    fn drop_if_empty(&mut self, key: &str) {
        if self.values.get(key).is_some_and(HashMap::is_empty) {
            self.values.remove(key);
            self.deadlines.remove(key);
        }
    }
}

/// In-process [`KvStore`] with Redis hash semantics, including TTLs.
#[derive(Default)]
pub struct MemoryStore {
    hashes: RwLock<Hashes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn exists(&self, key: &str) -> ProviderResult<bool> {
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        Ok(hashes.values.contains_key(key))
    }

    async fn hget(&self, key: &str, field: &str) -> ProviderResult<Option<String>> {
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        Ok(hashes.values.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> ProviderResult<()> {
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        hashes
            .values
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> ProviderResult<HashMap<String, String>> {
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        Ok(hashes.values.get(key).cloned().unwrap_or_default())
    }

    async fn del(&self, key: &str) -> ProviderResult<()> {
        let mut hashes = self.hashes.write().await;
        hashes.values.remove(key);
        hashes.deadlines.remove(key);
        Ok(())
    }

    async fn hset_all(&self, key: &str, entries: &[(String, String)], ttl: Option<Duration>) -> ProviderResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        hashes
            .values
            .entry(key.to_string())
            .or_default()
            .extend(entries.iter().cloned());
        if let Some(ttl) = ttl {
            hashes.deadlines.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn adjust_count(&self, key: &str, field: &str, delta: i64) -> ProviderResult<Option<i64>> {
        let mut hashes = self.hashes.write().await;
        hashes.purge_expired();
        let Some(hash) = hashes.values.get_mut(key) else {
            return Ok(None);
        };
        let current: i64 = match hash.get(field) {
            Some(value) => value
                .parse()
                .map_err(|_| ProviderError::Other(format!("hash value is not an integer: {}", value)))?,
            None => 0,
        };
        let updated = current + delta;
        if updated <= 0 {
            hash.remove(field);
            hashes.drop_if_empty(key);
        } else {
            hash.insert(field.to_string(), updated.to_string());
        }
        Ok(Some(updated))
    }
}

/// In-process authoritative tag index: file id → set of tags.
#[derive(Default)]
pub struct MemoryTagIndex {
    files: RwLock<HashMap<String, HashSet<Tag>>>,
}

impl MemoryTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file so that tags can be attached to it.
    pub async fn insert_file(&self, file_id: &str, tags: impl IntoIterator<Item = Tag>) {
        let mut files = self.files.write().await;
        files.entry(file_id.to_string()).or_default().extend(tags);
    }
}

#[async_trait]
impl TagAggregator for MemoryTagIndex {
    async fn tag_stats(&self) -> ProviderResult<Vec<TagCountEntry>> {
        let files = self.files.read().await;
        let mut counts: BTreeMap<(TagType, String), u64> = BTreeMap::new();
        for tag in files.values().flatten() {
            *counts.entry((tag.tag_type, tag.name.clone())).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((tag_type, name), files_count)| TagCountEntry {
                name,
                tag_type,
                files_count,
            })
            .collect())
    }
}

#[async_trait]
impl TagMutator for MemoryTagIndex {
    async fn add_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange> {
        let mut files = self.files.write().await;
        let tags = files
            .get_mut(file_id)
            .ok_or_else(|| ProviderError::NotFound(format!("file {}", file_id)))?;
        Ok(if tags.insert(tag.clone()) {
            TagChange::Applied
        } else {
            TagChange::Unchanged
        })
    }

    async fn remove_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange> {
        let mut files = self.files.write().await;
        let tags = files
            .get_mut(file_id)
            .ok_or_else(|| ProviderError::NotFound(format!("file {}", file_id)))?;
        Ok(if tags.remove(tag) {
            TagChange::Applied
        } else {
            TagChange::Unchanged
        })
    }
}
