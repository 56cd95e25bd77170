//! Per-request scratch directories.
//!
//! A [`Workspace`] owns its directory: dropping it removes the directory and
//! everything in it. That covers early returns, errors and cancelled futures
//! alike; [`Workspace::close`] is the explicit path that reports failures.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Allocates workspaces under a common root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root` (created on first allocation)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates an isolated directory keyed by requester and timestamp
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn allocate(&self, requester: i64, at: DateTime<Utc>) -> io::Result<Workspace> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("req_{requester}_{}_", at.timestamp_millis()))
            .tempdir_in(&self.root)?;
        debug!(path = %dir.path().display(), "Workspace allocated");
        Ok(Workspace { dir })
    }
}

/// Scratch directory owned by one request
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Workspace directory
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates a fresh sub-directory for one backend attempt
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn scratch(&self, label: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(label);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Removes the directory now
    ///
    /// # Errors
    ///
    /// Returns an I/O error if removal fails.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Workspace removed");
        Ok(())
    }
}
