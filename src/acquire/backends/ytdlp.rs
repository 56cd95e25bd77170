//! yt-dlp backend - generic downloader, fastest and first in the default order.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::acquire::backend::{list_files, matches_any, run_tool, ExtractionBackend, RawFetch};
use crate::acquire::url::CanonicalUrl;
use crate::error::FetchError;

/// Diagnostics meaning the content is gone for good
const PERMANENT_PATTERNS: &[&str] = &[
    "HTTP Error 404",
    "HTTP Error 410",
    "does not exist",
    "Video unavailable",
    "This content isn't available",
    "has been removed",
    "no longer available",
    "Unsupported URL",
];

/// Diagnostics meaning the content is private or behind a login
const AUTH_PATTERNS: &[&str] = &[
    "login required",
    "Private video",
    "This account is private",
    "Sign in to",
    "logged-in",
    "HTTP Error 401",
    "HTTP Error 403",
];

/// Diagnostics worth retrying on the same backend
const TRANSIENT_PATTERNS: &[&str] = &[
    "HTTP Error 429",
    "HTTP Error 502",
    "HTTP Error 503",
    "timed out",
    "Connection reset",
    "Connection refused",
    "Temporary failure in name resolution",
    "network is unreachable",
    "Unable to download webpage",
];

/// Classifies yt-dlp's error output
#[must_use]
pub fn classify(error_text: &str) -> FetchError {
    let summary = error_text
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or(error_text)
        .trim()
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

#[derive(Debug, Default, Deserialize)]
struct InfoJson {
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl InfoJson {
    fn display_title(&self) -> Option<&str> {
        [&self.uploader, &self.channel, &self.title]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }
}

/// Provider for downloads via the yt-dlp executable
pub struct YtdlpBackend {
    binary: String,
    cookies: Option<PathBuf>,
}

impl YtdlpBackend {
    /// Create a new backend using `binary`, optionally with a Netscape cookies file
    #[must_use]
    pub fn new(binary: impl Into<String>, cookies: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies,
        }
    }

    fn args(&self, url: &CanonicalUrl, workspace: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--write-info-json".to_string(),
            "--no-write-playlist-metafiles".to_string(),
            "-P".to_string(),
            workspace.to_string_lossy().into_owned(),
            "-o".to_string(),
            "%(autonumber)03d_%(id)s.%(ext)s".to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(url.as_str().to_string());
        args
    }

    /// Reads title and description from the per-item info JSON sidecars
    async fn read_metadata(files: &[PathBuf]) -> (String, String) {
        let mut title = String::new();
        let mut description = String::new();

        for path in files
            .iter()
            .filter(|p| p.to_string_lossy().ends_with(".info.json"))
        {
            let info: InfoJson = match tokio::fs::read(path).await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Failed to read yt-dlp info JSON");
                    continue;
                }
            };
            if title.is_empty() {
                if let Some(t) = info.display_title() {
                    title = t.to_string();
                }
            }
            if description.is_empty() {
                if let Some(d) = info.description.filter(|d| !d.trim().is_empty()) {
                    description = d;
                }
            }
        }

        (title, description)
    }
}

#[async_trait]
impl ExtractionBackend for YtdlpBackend {
    fn name(&self) -> &'static str {
        "ytdlp"
    }

    async fn fetch(&self, url: &CanonicalUrl, workspace: &Path) -> Result<RawFetch, FetchError> {
        let output = run_tool(&self.binary, &self.args(url, workspace), workspace).await?;

        if !output.success {
            let error = classify(output.error_text());
            warn!(url = %url, kind = error.label(), "yt-dlp failed");
            return Err(error);
        }

        let files = list_files(workspace).await?;
        let (title, description) = Self::read_metadata(&files).await;
        debug!(url = %url, files = files.len(), "yt-dlp finished");

        Ok(RawFetch {
            files,
            title,
            description,
        })
    }
}
