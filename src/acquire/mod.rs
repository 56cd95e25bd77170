//! Content acquisition
//!
//! Turns a canonical URL into an ordered list of local media files by
//! driving extraction backends through the retry/fallback orchestrator and
//! assembling their output.

/// Result assembly from raw backend output
pub mod assembler;
/// Extraction backend capability
pub mod backend;
/// Concrete extraction backends
pub mod backends;
/// Retry/fallback state machine over backends
pub mod orchestrator;
/// Login refresh shared by the credentialed backends
pub mod session;
/// URL canonicalization
pub mod url;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use backend::{ExtractionBackend, RawFetch};
pub use orchestrator::{Orchestrator, RetryPolicy};
pub use url::{normalize, CanonicalUrl, ContentKind};

/// Kind of a delivered media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Photo,
    /// Video clip
    Video,
}

impl MediaKind {
    /// Stable lowercase name, as stored in the cache
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    /// Parses a stored kind name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A downloaded file inside a request workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    /// Location inside the workspace
    pub path: PathBuf,
    /// Photo or video
    pub kind: MediaKind,
    /// File size in bytes
    pub size: u64,
    /// Position in acquisition order
    pub index: usize,
}

/// Ordered media produced by one successful backend run
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    /// Assets in delivery order
    pub assets: Vec<MediaAsset>,
    /// Post title (usually the author)
    pub title: String,
    /// Post description / caption
    pub description: String,
    /// Backend that produced the files
    pub backend: &'static str,
}
