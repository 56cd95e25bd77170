//! Error taxonomy for the acquisition pipeline.
//!
//! Backends return [`FetchError`], already classified. The coordinator
//! surfaces a single [`PipelineError`]; only [`PipelineError::user_message`]
//! text is ever shown to the requester.

use std::fmt::Write;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single backend invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Rate limit, timeout or network fault. Safe to retry the same backend.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Content does not exist or was deleted
    #[error("content unavailable: {0}")]
    Permanent(String),
    /// Private or gated content; another backend with other credentials may help
    #[error("authentication required: {0}")]
    AuthRequired(String),
    /// Unclassified failure
    #[error("unclassified failure: {0}")]
    Unknown(String),
}

impl FetchError {
    /// Whether the same backend may be retried after this failure
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine label used in logs and admin reports
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::AuthRequired(_) => "auth_required",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Last error observed for one backend during an orchestration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Backend name
    pub backend: &'static str,
    /// Number of attempts made on this backend
    pub attempts: usize,
    /// Last classified error
    pub error: FetchError,
}

fn describe_causes(causes: &[BackendFailure]) -> String {
    if causes.is_empty() {
        return "no backends configured".to_string();
    }
    let mut out = String::new();
    for (i, cause) in causes.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        let _ = write!(
            out,
            "{} ({} attempts): {}",
            cause.backend, cause.attempts, cause.error
        );
    }
    out
}

/// Failure surfaced by the request coordinator
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input is not a recognized content URL
    #[error("invalid content URL: {0}")]
    InvalidUrl(String),
    /// Every backend failed; one cause per backend, in backend order
    #[error("all backends exhausted: {}", describe_causes(.0))]
    AllBackendsExhausted(Vec<BackendFailure>),
    /// Backend reported success but nothing usable was downloaded
    #[error("backend succeeded but produced no media files")]
    NoMediaFound,
    /// Delivery of an item failed
    #[error("delivery failed: {0}")]
    SendFailure(String),
    /// A cached channel reference was rejected
    #[error("cached channel reference is no longer valid")]
    StaleReference,
    /// Scratch directory could not be created, read or removed
    #[error("workspace I/O failure: {0}")]
    WorkspaceIo(#[from] std::io::Error),
    /// The per-request deadline expired
    #[error("request exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// Classification label, used for admin reports and log fields
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::AllBackendsExhausted(causes) => match dominant_cause(causes) {
                Some(FetchError::AuthRequired(_)) => "auth_required",
                Some(FetchError::Permanent(_)) => "permanent",
                _ => "all_backends_exhausted",
            },
            Self::NoMediaFound => "no_media_found",
            Self::SendFailure(_) => "send_failure",
            Self::StaleReference => "stale_reference",
            Self::WorkspaceIo(_) => "workspace_io",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Fixed user-facing text for this failure. Never includes backend output.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.label() {
            "invalid_url" => "❌ Please send a valid post, reel or story link.",
            "auth_required" => {
                "🔒 This content is private. The bot can only fetch posts it is allowed to see."
            }
            "permanent" => "🚫 Post not found. The link is wrong or the post was deleted.",
            "no_media_found" => "🤷 No photos or videos were found in this post.",
            "send_failure" | "stale_reference" => {
                "⚠️ Failed to send the media. Please try again."
            }
            "timeout" => "⌛ Downloading took too long. Please try again later.",
            _ => "⚠️ Could not download this post right now. Please try again later.",
        }
    }
}

/// Picks the cause that best explains an exhausted run.
///
/// `AuthRequired` wins over `Permanent`; transient and unknown causes only
/// yield the generic classification.
fn dominant_cause(causes: &[BackendFailure]) -> Option<&FetchError> {
    causes
        .iter()
        .map(|c| &c.error)
        .find(|e| matches!(e, FetchError::AuthRequired(_)))
        .or_else(|| {
            causes
                .iter()
                .map(|c| &c.error)
                .find(|e| matches!(e, FetchError::Permanent(_)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(backend: &'static str, error: FetchError) -> BackendFailure {
        BackendFailure {
            backend,
            attempts: 1,
            error,
        }
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(FetchError::Transient("429".into()).is_transient());
        assert!(!FetchError::Permanent("404".into()).is_transient());
        assert!(!FetchError::AuthRequired("private".into()).is_transient());
        assert!(!FetchError::Unknown("?".into()).is_transient());
    }

    #[test]
    fn test_exhausted_prefers_auth_classification() {
        let err = PipelineError::AllBackendsExhausted(vec![
            failure("ytdlp", FetchError::Permanent("gone".into())),
            failure("instaloader", FetchError::AuthRequired("private".into())),
        ]);
        assert_eq!(err.label(), "auth_required");
    }

    #[test]
    fn test_exhausted_with_transient_causes_is_generic() {
        let err = PipelineError::AllBackendsExhausted(vec![failure(
            "ytdlp",
            FetchError::Transient("timeout".into()),
        )]);
        assert_eq!(err.label(), "all_backends_exhausted");
    }

    #[test]
    fn test_user_message_hides_backend_output() {
        let err = PipelineError::AllBackendsExhausted(vec![failure(
            "ytdlp",
            FetchError::Unknown("ERROR: secret stderr line".into()),
        )]);
        assert!(!err.user_message().contains("secret"));
        assert!(err.to_string().contains("ytdlp (1 attempts)"));
    }
}
