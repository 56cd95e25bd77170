//! Extraction backend capability and shared helpers for backend implementations.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::url::CanonicalUrl;
use crate::error::FetchError;

/// Raw output of a successful backend run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFetch {
    /// Files written into the workspace, possibly including sidecar files
    pub files: Vec<PathBuf>,
    /// Post title (usually the author)
    pub title: String,
    /// Post description / caption
    pub description: String,
}

/// Interface for content extraction backends
///
/// Implementations write files only inside `workspace` and classify every
/// failure into a [`FetchError`] variant themselves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Name of the backend (for logging and error aggregation)
    fn name(&self) -> &'static str;

    /// Downloads the media addressed by `url` into `workspace`
    async fn fetch(&self, url: &CanonicalUrl, workspace: &Path) -> Result<RawFetch, FetchError>;
}

/// Captured output of an external tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Whether the process exited with status 0
    pub success: bool,
}

impl ToolOutput {
    /// Stderr, or stdout when stderr is empty
    #[must_use]
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs an external extraction tool inside `workdir`.
///
/// The child is killed when the returned future is dropped, so an expired
/// request deadline abandons the download.
///
/// # Errors
///
/// A missing executable is reported as [`FetchError::Unknown`] so the
/// orchestrator falls back to the next backend.
pub async fn run_tool(binary: &str, args: &[String], workdir: &Path) -> Result<ToolOutput, FetchError> {
    debug!(binary = %binary, ?args, "Executing extraction tool");

    let output = Command::new(binary)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                FetchError::Unknown(format!("{binary} is not installed"))
            }
            _ => FetchError::Unknown(format!("failed to start {binary}: {e}")),
        })?;

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}

/// Lists regular files directly inside `dir`, sorted by name
///
/// # Errors
///
/// Directory read failures are reported as [`FetchError::Unknown`].
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
    let io_err = |e: std::io::Error| FetchError::Unknown(format!("cannot list workspace: {e}"));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if entry.file_type().await.map_err(io_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Whether `text` contains any of `patterns`, ignoring case
///
/// Backends use this to translate their tool's diagnostics into a
/// [`FetchError`] variant at the backend boundary.
#[must_use]
pub fn matches_any(text: &str, patterns: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    patterns
        .iter()
        .any(|pattern| lowered.contains(&pattern.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_fallback_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_tool("definitely-not-a-real-extractor", &[], dir.path()).await;
        assert!(matches!(result, Err(FetchError::Unknown(msg)) if msg.contains("not installed")));
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.jpg"]);
    }

    #[test]
    fn test_matches_any_is_case_insensitive() {
        assert!(matches_any("ERROR: HTTP Error 429: Too Many", &["http error 429"]));
        assert!(!matches_any("all good", &["404"]));
    }
}
