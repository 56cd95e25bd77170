//! Retry/fallback orchestration over a prioritized backend list.
//!
//! Per request the orchestrator walks the backends in order. A backend is
//! retried only on [`FetchError::Transient`], up to `max_retries` attempts with
//! a linear backoff (`base * attempt`). Any other failure moves on to the next
//! backend immediately. The first non-empty result wins.
//!
//! Backend invocations go through a shared semaphore, the worker pool, which
//! bounds how many downloads run at once across all requests. Backoff sleeps
//! do not hold a pool slot.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use super::backend::{ExtractionBackend, RawFetch};
use super::url::CanonicalUrl;
use crate::config::{BACKEND_BACKOFF_BASE, BACKEND_MAX_RETRIES};
use crate::error::{BackendFailure, FetchError, PipelineError};
use crate::workspace::Workspace;

/// Attempts and backoff for transient failures on one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per backend (first try included)
    pub max_retries: usize,
    /// Delay before attempt `n + 1` is `backoff_base * n`
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: BACKEND_MAX_RETRIES,
            backoff_base: BACKEND_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Delays between consecutive attempts: `base * 1`, `base * 2`, ...
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.backoff_base;
        (1..self.max_retries.max(1)).map(move |attempt| {
            base.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
        })
    }
}

/// Successful orchestration run
#[derive(Debug, Clone)]
pub struct BackendSuccess {
    /// Backend that produced the files
    pub backend: &'static str,
    /// Its raw output
    pub fetch: RawFetch,
}

/// Drives backends in priority order with bounded retries
pub struct Orchestrator {
    backends: Vec<Arc<dyn ExtractionBackend>>,
    policy: RetryPolicy,
    pool: Arc<Semaphore>,
}

impl Orchestrator {
    /// Creates an orchestrator with a worker pool of `pool_size` slots
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn ExtractionBackend>>,
        policy: RetryPolicy,
        pool_size: usize,
    ) -> Self {
        Self {
            backends,
            policy,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Backend names in priority order
    #[must_use]
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Runs the state machine for one request.
    ///
    /// Each attempt gets its own scratch directory inside `workspace`, so
    /// leftovers of a failed attempt never leak into a later result.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AllBackendsExhausted`] with the last error of every
    /// backend tried, in backend order. [`PipelineError::WorkspaceIo`] if a
    /// scratch directory cannot be created.
    pub async fn run(
        &self,
        url: &CanonicalUrl,
        workspace: &Workspace,
    ) -> Result<BackendSuccess, PipelineError> {
        let mut failures = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let name = backend.name();
            let counter = AtomicUsize::new(0);
            let attempts = &counter;
            let backend: &dyn ExtractionBackend = backend.as_ref();

            let outcome = RetryIf::spawn(
                self.policy.delays(),
                move || async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let scratch = workspace
                        .scratch(&format!("{name}-{attempt}"))
                        .map_err(AttemptError::Workspace)?;
                    debug!(backend = name, attempt, "Trying backend");
                    self.invoke(backend, url, &scratch)
                        .await
                        .map_err(AttemptError::Backend)
                },
                |e: &AttemptError| matches!(e, AttemptError::Backend(f) if f.is_transient()),
            )
            .await;

            let attempts = counter.load(Ordering::SeqCst);
            match outcome {
                Ok(fetch) => {
                    info!(backend = name, attempts, files = fetch.files.len(), "Backend succeeded");
                    return Ok(BackendSuccess {
                        backend: name,
                        fetch,
                    });
                }
                Err(AttemptError::Workspace(e)) => return Err(PipelineError::WorkspaceIo(e)),
                Err(AttemptError::Backend(error)) => {
                    warn!(backend = name, attempts, kind = error.label(), error = %error, "Backend failed, falling back");
                    failures.push(BackendFailure {
                        backend: name,
                        attempts,
                        error,
                    });
                }
            }
        }

        Err(PipelineError::AllBackendsExhausted(failures))
    }

    /// One backend call inside a worker pool slot
    async fn invoke(
        &self,
        backend: &dyn ExtractionBackend,
        url: &CanonicalUrl,
        scratch: &Path,
    ) -> Result<RawFetch, FetchError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| FetchError::Unknown("worker pool closed".to_string()))?;

        let fetch = backend.fetch(url, scratch).await?;
        if fetch.files.is_empty() {
            return Err(FetchError::Unknown(
                "backend reported success without files".to_string(),
            ));
        }
        Ok(fetch)
    }
}

/// Failure of a single attempt
#[derive(Debug)]
enum AttemptError {
    /// Classified backend failure
    Backend(FetchError),
    /// Scratch directory could not be created
    Workspace(std::io::Error),
}
