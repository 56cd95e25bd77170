//! Request coordinator.
//!
//! Owns one request end to end: normalize, cache lookup, replay or fresh
//! acquisition, dispatch, cache write. Every shared resource lives in a
//! [`PipelineContext`] built once at startup and passed in explicitly.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::acquire::assembler::assemble;
use crate::acquire::{normalize, CanonicalUrl, ExtractionBackend, Orchestrator, RetryPolicy};
use crate::cache::{CacheEntry, CacheStore, CachedMedia, MediaCache};
use crate::dispatch::caption::{full_caption, replay_caption};
use crate::dispatch::{DeliveryChannel, Dispatcher, MediaSource, OutgoingMedia};
use crate::error::PipelineError;
use crate::workspace::WorkspaceManager;

/// Coordinator configuration, resolved from settings at startup
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-backend retry policy
    pub retry: RetryPolicy,
    /// Concurrent backend invocations across all requests
    pub worker_pool_size: usize,
    /// Deadline for one request (backend and send time)
    pub request_timeout: Duration,
    /// Cache entry lifetime
    pub cache_ttl: Duration,
    /// Parent directory of request workspaces
    pub workspace_root: PathBuf,
    /// Maximum items per grouped send
    pub media_group_limit: usize,
    /// Sends between pauses in oversized runs
    pub sends_per_pause: usize,
    /// Pause length in oversized runs
    pub oversized_pause: Duration,
    /// Bot username for the caption footer
    pub bot_username: Option<String>,
}

/// One incoming request
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    /// Correlation id for logs
    pub id: Uuid,
    /// Requesting user
    pub requester: i64,
    /// URL exactly as received
    pub raw_url: String,
    /// Arrival time
    pub created_at: DateTime<Utc>,
}

impl AcquisitionRequest {
    /// New request stamped with a fresh id and the current time
    #[must_use]
    pub fn new(requester: i64, raw_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            raw_url: raw_url.into(),
            created_at: Utc::now(),
        }
    }
}

/// How a successful request was served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Replayed from stored channel references
    FromCache {
        /// Items sent
        count: usize,
    },
    /// Acquired and uploaded
    Fresh {
        /// Items sent
        count: usize,
        /// Backend that produced the media
        backend: &'static str,
    },
}

impl Delivery {
    /// Number of items delivered
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::FromCache { count } | Self::Fresh { count, .. } => *count,
        }
    }
}

/// Shared state for all requests
pub struct PipelineContext {
    orchestrator: Orchestrator,
    cache: MediaCache,
    workspaces: WorkspaceManager,
    dispatcher: Dispatcher,
    config: PipelineConfig,
}

impl PipelineContext {
    /// Builds the context from backend instances, a cache store and config
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn ExtractionBackend>>,
        store: Arc<dyn CacheStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(backends, config.retry, config.worker_pool_size),
            cache: MediaCache::new(store, config.cache_ttl),
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            dispatcher: Dispatcher::new(
                config.media_group_limit,
                config.sends_per_pause,
                config.oversized_pause,
            ),
            config,
        }
    }

    /// Cache handle
    #[must_use]
    pub const fn cache(&self) -> &MediaCache {
        &self.cache
    }

    /// Resolved configuration
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Backend names in priority order
    #[must_use]
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.orchestrator.backend_names()
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-key async locks; entries are removed once nobody holds or waits
#[derive(Default, Clone)]
struct KeyLocks {
    map: LockMap,
}

struct KeyGuard {
    key: String,
    map: LockMap,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        KeyGuard {
            key: key.to_string(),
            map: Arc::clone(&self.map),
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // map entry + this guard
        if map.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            map.remove(&self.key);
        }
    }
}

struct FreshDelivery {
    items: Vec<CachedMedia>,
    backend: &'static str,
    title: String,
}

/// Entry point for requests
#[derive(Clone)]
pub struct Coordinator {
    ctx: Arc<PipelineContext>,
    in_flight: KeyLocks,
}

impl Coordinator {
    /// Creates a coordinator over a shared context
    #[must_use]
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            in_flight: KeyLocks::default(),
        }
    }

    /// Shared context
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Handles one request, delivering media through `channel`.
    ///
    /// The workspace of a fresh acquisition is removed on every path,
    /// including deadline expiry.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`]; use [`PipelineError::user_message`] for the
    /// text shown to the requester.
    pub async fn handle(
        &self,
        request: &AcquisitionRequest,
        channel: &dyn DeliveryChannel,
    ) -> Result<Delivery, PipelineError> {
        let url = match normalize(&request.raw_url) {
            Ok(url) => url,
            Err(e) => {
                info!(request_id = %request.id, user_id = request.requester, "Rejected URL");
                return Err(e);
            }
        };

        let span = info_span!(
            "request",
            request_id = %request.id,
            user_id = request.requester,
            url = %url
        );
        async {
            let result = self.run(request, &url, channel).await;
            match &result {
                Ok(delivery) => info!(?delivery, "Request served"),
                Err(e) => warn!(kind = e.label(), error = %e, "Request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &AcquisitionRequest,
        url: &CanonicalUrl,
        channel: &dyn DeliveryChannel,
    ) -> Result<Delivery, PipelineError> {
        let timeout = self.ctx.config.request_timeout;
        let deadline = Instant::now() + timeout;
        let expired = |_| PipelineError::Timeout(timeout);

        let _key = timeout_at(deadline, self.in_flight.acquire(url.as_str()))
            .await
            .map_err(expired)?;

        if let Some(entry) = self.ctx.cache.get(url).await {
            match timeout_at(deadline, self.replay(&entry, channel))
                .await
                .map_err(expired)?
            {
                Ok(count) => return Ok(Delivery::FromCache { count }),
                Err(PipelineError::StaleReference) => {
                    warn!("Cached references rejected, acquiring again");
                    self.ctx.cache.invalidate(url).await;
                }
                Err(e) => return Err(e),
            }
        }

        channel.acquisition_started().await;
        let outcome = timeout_at(deadline, self.acquire_and_deliver(request, url, channel)).await;
        channel.acquisition_finished().await;
        let fresh = outcome.map_err(expired)??;

        let count = fresh.items.len();
        if let Err(e) = self.ctx.cache.put(url, fresh.items, &fresh.title).await {
            error!(error = %e, "Failed to write cache entry");
        }
        Ok(Delivery::Fresh {
            count,
            backend: fresh.backend,
        })
    }

    async fn replay(
        &self,
        entry: &CacheEntry,
        channel: &dyn DeliveryChannel,
    ) -> Result<usize, PipelineError> {
        let items = entry
            .items
            .iter()
            .map(|m| OutgoingMedia::new(m.kind, MediaSource::Reference(m.reference.clone())))
            .collect();
        let caption = replay_caption(&entry.title, self.ctx.config.bot_username.as_deref());
        let sent = self.ctx.dispatcher.deliver(channel, items, caption).await?;
        Ok(sent.len())
    }

    async fn acquire_and_deliver(
        &self,
        request: &AcquisitionRequest,
        url: &CanonicalUrl,
        channel: &dyn DeliveryChannel,
    ) -> Result<FreshDelivery, PipelineError> {
        let workspace = self
            .ctx
            .workspaces
            .allocate(request.requester, request.created_at)?;

        let result = async {
            let success = self.ctx.orchestrator.run(url, &workspace).await?;
            let acquired = assemble(success).await?;
            info!(
                backend = acquired.backend,
                assets = acquired.assets.len(),
                "Media acquired"
            );

            let caption = full_caption(
                &acquired.title,
                &acquired.description,
                self.ctx.config.bot_username.as_deref(),
            );
            let items = acquired
                .assets
                .iter()
                .map(|a| OutgoingMedia::new(a.kind, MediaSource::Upload(a.path.clone())))
                .collect();
            let delivered = self.ctx.dispatcher.deliver(channel, items, caption).await?;

            Ok(FreshDelivery {
                items: delivered,
                backend: acquired.backend,
                title: acquired.title,
            })
        }
        .await;

        if let Err(e) = workspace.close() {
            error!(error = %e, "Failed to remove workspace");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_lock_serializes_and_cleans_up() {
        let locks = KeyLocks::default();
        let first = locks.acquire("a").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _second = locks.acquire("a").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(locks.len(), 1);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::default();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_delivery_count() {
        assert_eq!(Delivery::FromCache { count: 3 }.count(), 3);
        assert_eq!(
            Delivery::Fresh {
                count: 2,
                backend: "ytdlp"
            }
            .count(),
            2
        );
    }
}
