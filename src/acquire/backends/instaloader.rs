//! Instaloader backend - session-authenticated client, slowest and last in
//! the default order. It can see private posts followed by the bot account.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::acquire::backend::{list_files, matches_any, run_tool, ExtractionBackend, RawFetch};
use crate::acquire::url::CanonicalUrl;
use crate::error::FetchError;

/// Caption file layout: first line owner, remaining lines caption
const METADATA_TEMPLATE: &str = "{owner_username}\n{caption}";

const PERMANENT_PATTERNS: &[&str] = &[
    "NotFoundException",
    "does not exist",
    "404 Not Found",
    "Post not found",
];

const AUTH_PATTERNS: &[&str] = &[
    "PrivateProfileNotFollowedException",
    "LoginRequiredException",
    "Login required",
    "private profile",
    "checkpoint required",
    "Session file does not exist",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "429",
    "Too many queries",
    "Please wait a few minutes",
    "timed out",
    "ConnectionException",
    "Connection reset",
];

/// Classifies instaloader's error output
#[must_use]
pub fn classify(error_text: &str) -> FetchError {
    let summary = error_text
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();

    if matches_any(error_text, PERMANENT_PATTERNS) {
        FetchError::Permanent(summary)
    } else if matches_any(error_text, AUTH_PATTERNS) {
        FetchError::AuthRequired(summary)
    } else if matches_any(error_text, TRANSIENT_PATTERNS) {
        FetchError::Transient(summary)
    } else {
        FetchError::Unknown(summary)
    }
}

/// Splits a caption file into (title, description)
fn parse_caption_file(text: &str) -> (String, String) {
    match text.split_once('\n') {
        Some((title, description)) => (title.trim().to_string(), description.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

/// Provider for downloads via the instaloader executable and a saved session
pub struct InstaloaderBackend {
    binary: String,
    username: Option<String>,
    session_file: Option<PathBuf>,
}

impl InstaloaderBackend {
    /// Create a new backend. Without `username` instaloader runs anonymously.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        username: Option<String>,
        session_file: Option<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            username,
            session_file,
        }
    }

    fn args(&self, shortcode: &str, workspace: &Path) -> Vec<String> {
        let mut args = vec![
            "--quiet".to_string(),
            "--dirname-pattern".to_string(),
            workspace.to_string_lossy().into_owned(),
            "--filename-pattern".to_string(),
            "{shortcode}".to_string(),
            "--no-video-thumbnails".to_string(),
            "--no-metadata-json".to_string(),
            "--post-metadata-txt".to_string(),
            METADATA_TEMPLATE.to_string(),
        ];
        if let Some(username) = &self.username {
            args.push("--login".to_string());
            args.push(username.clone());
            if let Some(session) = &self.session_file {
                args.push("--sessionfile".to_string());
                args.push(session.to_string_lossy().into_owned());
            }
        }
        args.push("--".to_string());
        args.push(format!("-{shortcode}"));
        args
    }
}

#[async_trait]
impl ExtractionBackend for InstaloaderBackend {
    fn name(&self) -> &'static str {
        "instaloader"
    }

    async fn fetch(&self, url: &CanonicalUrl, workspace: &Path) -> Result<RawFetch, FetchError> {
        if !url.kind().has_shortcode() {
            return Err(FetchError::Unknown(format!(
                "instaloader cannot fetch {} links",
                url.kind().segment()
            )));
        }

        let output = run_tool(&self.binary, &self.args(url.identifier(), workspace), workspace).await?;
        if !output.success {
            let error = classify(output.error_text());
            warn!(url = %url, kind = error.label(), "instaloader failed");
            return Err(error);
        }

        let files = list_files(workspace).await?;
        let (captions, media): (Vec<_>, Vec<_>) = files
            .iter()
            .partition(|p| p.extension().is_some_and(|e| e == "txt"));

        // instaloader may exit 0 after logging a per-post error
        if media.is_empty() {
            return Err(if output.error_text().trim().is_empty() {
                FetchError::Unknown("instaloader produced no files".to_string())
            } else {
                classify(output.error_text())
            });
        }

        let (title, description) = match captions.first() {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => parse_caption_file(&text),
                Err(e) => {
                    warn!(error = %e, "Failed to read instaloader caption file");
                    (String::new(), String::new())
                }
            },
            None => (String::new(), String::new()),
        };
        debug!(url = %url, files = files.len(), "instaloader finished");

        Ok(RawFetch {
            files,
            title,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::url::normalize;

    #[test]
    fn test_classify_instaloader_errors() {
        assert!(matches!(
            classify("Fetching Post metadata failed.\nPrivateProfileNotFollowedException: x"),
            FetchError::AuthRequired(_)
        ));
        assert!(matches!(
            classify("-ABC: Post ABC does not exist."),
            FetchError::Permanent(_)
        ));
        assert!(classify("JSON Query: 429 Too Many Requests").is_transient());
        assert!(matches!(classify("boom"), FetchError::Unknown(s) if s == "boom"));
    }

    #[test]
    fn test_caption_file_split() {
        assert_eq!(
            parse_caption_file("alice\nfirst line\nsecond line\n"),
            ("alice".to_string(), "first line\nsecond line".to_string())
        );
        assert_eq!(parse_caption_file("bob"), ("bob".to_string(), String::new()));
    }

    #[test]
    fn test_args_use_session_only_with_login() {
        let anonymous = InstaloaderBackend::new("instaloader", None, Some("s".into()));
        let args = anonymous.args("ABC", Path::new("/tmp/ws"));
        assert!(!args.contains(&"--sessionfile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-ABC"));

        let logged_in =
            InstaloaderBackend::new("instaloader", Some("bot".into()), Some("/s/bot".into()));
        let args = logged_in.args("ABC", Path::new("/tmp/ws"));
        assert!(args.windows(2).any(|w| w[0] == "--login" && w[1] == "bot"));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "--sessionfile" && w[1] == "/s/bot"));
    }

    #[tokio::test]
    async fn test_stories_are_rejected_before_running_tool() {
        let backend = InstaloaderBackend::new("definitely-not-installed", None, None);
        let url = normalize("https://instagram.com/stories/alice/123").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = backend.fetch(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::Unknown(msg) if msg.contains("stories")));
    }
}
