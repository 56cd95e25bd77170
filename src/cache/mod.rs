//! TTL cache of delivered channel references, keyed by canonical URL.
//!
//! The persistence engine is a plain key-value [`CacheStore`] with
//! read/upsert/delete. Expiry lives in [`MediaCache`]: an entry older than the
//! TTL is reported as a miss and deleted on the read that notices it, so no
//! background sweep is needed.

/// In-memory store backed by moka
pub mod memory;
/// SQLite store
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquire::{CanonicalUrl, MediaKind};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors that can occur during cache store operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Stored row violates an entry invariant
    #[error("Corrupt entry for {url}: {reason}")]
    Corrupt {
        /// Key of the bad row
        url: String,
        /// What is wrong with it
        reason: String,
    },
    /// Blocking task failed
    #[error("Store task failed: {0}")]
    Task(String),
}

/// One delivered item: channel reference plus kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMedia {
    /// Opaque channel reference (Telegram `file_id`)
    pub reference: String,
    /// Photo or video
    pub kind: MediaKind,
}

/// Cached delivery for one canonical URL
///
/// References and kinds are held as one list, so their lengths always match
/// and they stay in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonical URL (unique key)
    pub url: String,
    /// Delivered items in order
    pub items: Vec<CachedMedia>,
    /// Post title
    pub title: String,
    /// When the entry was written
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    /// References in delivery order
    #[must_use]
    pub fn refs(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.reference.as_str()).collect()
    }

    /// Kinds in delivery order
    #[must_use]
    pub fn kinds(&self) -> Vec<MediaKind> {
        self.items.iter().map(|i| i.kind).collect()
    }

    /// Whether the entry is older than `ttl` at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.inserted_at) > ttl
    }
}

/// Opaque key-value persistence for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the entry for `url`
    async fn read(&self, url: &str) -> Result<Option<CacheEntry>, CacheError>;
    /// Inserts or replaces the entry for `entry.url` atomically
    async fn upsert(&self, entry: CacheEntry) -> Result<(), CacheError>;
    /// Deletes the entry for `url` (no-op when absent)
    async fn delete(&self, url: &str) -> Result<(), CacheError>;
}

/// TTL-aware cache in front of a [`CacheStore`]
#[derive(Clone)]
pub struct MediaCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl MediaCache {
    /// Creates a cache with the given store and time-to-live
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Configured time-to-live
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up an unexpired entry.
    ///
    /// Store failures degrade to a miss.
    pub async fn get(&self, url: &CanonicalUrl) -> Option<CacheEntry> {
        self.get_at(url, Utc::now()).await
    }

    /// [`MediaCache::get`] evaluated at `now`
    pub async fn get_at(&self, url: &CanonicalUrl, now: DateTime<Utc>) -> Option<CacheEntry> {
        let entry = match self.store.read(url.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(url = %url, "Cache miss");
                return None;
            }
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!(url = %url, reason = %reason, "Dropping corrupt cache entry");
                self.invalidate(url).await;
                return None;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired(now, self.ttl) {
            info!(url = %url, inserted_at = %entry.inserted_at, "Cache entry expired");
            self.invalidate(url).await;
            return None;
        }

        debug!(url = %url, items = entry.items.len(), "Cache hit");
        Some(entry)
    }

    /// Stores the delivered items for `url`. A later write for the same key
    /// replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns the store error if the upsert fails.
    pub async fn put(
        &self,
        url: &CanonicalUrl,
        items: Vec<CachedMedia>,
        title: &str,
    ) -> Result<(), CacheError> {
        self.store
            .upsert(CacheEntry {
                url: url.as_str().to_string(),
                items,
                title: title.to_string(),
                inserted_at: Utc::now(),
            })
            .await
    }

    /// Deletes the entry for `url`, logging failures
    pub async fn invalidate(&self, url: &CanonicalUrl) {
        if let Err(e) = self.store.delete(url.as_str()).await {
            warn!(url = %url, error = %e, "Failed to delete cache entry");
        }
    }
}
