//! In-memory cache store.
//!
//! Used when no cache file is configured. Entries do not survive restarts.

use async_trait::async_trait;
use moka::future::Cache;

use super::{CacheEntry, CacheError, CacheStore};

/// Moka-backed [`CacheStore`]
///
/// Capacity-bounded; expiry is left to [`super::MediaCache`] so both stores
/// behave the same way.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, CacheEntry>,
}

impl MemoryStore {
    /// Creates a store holding at most `max_capacity` entries
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Returns the current number of entries in the store
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(&self, url: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.cache.get(url).await)
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.cache.insert(entry.url.clone(), entry).await;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<(), CacheError> {
        self.cache.invalidate(url).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            items: Vec::new(),
            title: "t".to_string(),
            inserted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_read_delete() {
        let store = MemoryStore::new(10);
        store.upsert(entry("a")).await.unwrap();

        assert!(store.read("a").await.unwrap().is_some());
        assert!(store.read("b").await.unwrap().is_none());

        store.delete("a").await.unwrap();
        assert!(store.read("a").await.unwrap().is_none());
        // deleting twice is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_count() {
        let store = MemoryStore::new(10);
        store.upsert(entry("a")).await.unwrap();
        store.upsert(entry("b")).await.unwrap();

        // Manually run pending tasks to update the entry count
        store.cache.run_pending_tasks().await;

        assert_eq!(store.entry_count(), 2);
    }
}
