//! Reel Relay - media acquisition, caching and delivery for a Telegram bot.
//!
//! A request carries a content URL. The URL is normalized into a cache key,
//! previously delivered media is replayed by channel reference when cached,
//! otherwise extraction backends are tried in priority order, the result is
//! delivered in batches and the channel references are cached.

/// Content acquisition: URL normalization, backends, retry/fallback, assembly
pub mod acquire;
/// Telegram transport (delivery channel and handlers)
pub mod bot;
/// TTL cache of delivered channel references
pub mod cache;
/// Configuration and settings management
pub mod config;
/// Batch-aware delivery to a channel
pub mod dispatch;
/// Error taxonomy shared across the pipeline
pub mod error;
/// Per-request coordination
pub mod pipeline;
/// Text helpers and Telegram retry utilities
pub mod utils;
/// Per-request scratch directories
pub mod workspace;

pub use error::{FetchError, PipelineError};
pub use pipeline::{AcquisitionRequest, Coordinator, Delivery, PipelineContext};
