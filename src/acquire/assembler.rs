//! Result assembly: filters sidecar files and orders media the way the post
//! presents it.

use std::cmp::Ordering;
use std::path::Path;
use std::time::SystemTime;

use super::orchestrator::BackendSuccess;
use super::{AcquisitionResult, MediaAsset, MediaKind};
use crate::error::PipelineError;

/// Extensions delivered as photos
pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];
/// Extensions delivered as videos
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "mkv"];

/// Media kind for a file, or `None` for sidecars (json, txt, srt, xz, ...)
#[must_use]
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Compares file names with digit runs taken as numbers, so `X_2.jpg`
/// sorts before `X_10.jpg`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        let (Some(ca), Some(cb)) = (a.chars().next(), b.chars().next()) else {
            return a.len().cmp(&b.len());
        };
        let ordering = if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let (da, rest_a) = split_digits(a);
            let (db, rest_b) = split_digits(b);
            a = rest_a;
            b = rest_b;
            let (va, vb) = (da.trim_start_matches('0'), db.trim_start_matches('0'));
            va.len()
                .cmp(&vb.len())
                .then_with(|| va.cmp(vb))
                .then_with(|| da.len().cmp(&db.len()))
        } else {
            a = &a[ca.len_utf8()..];
            b = &b[cb.len_utf8()..];
            ca.cmp(&cb)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

/// Builds the ordered asset list from a successful backend run.
///
/// Order is file modification time ascending, ties broken by file name,
/// which preserves carousel order for every backend.
///
/// # Errors
///
/// [`PipelineError::NoMediaFound`] when no media file survives filtering,
/// [`PipelineError::WorkspaceIo`] when a file cannot be inspected.
pub async fn assemble(success: BackendSuccess) -> Result<AcquisitionResult, PipelineError> {
    let BackendSuccess { backend, fetch } = success;

    let mut found: Vec<(SystemTime, String, MediaAsset)> = Vec::new();
    for path in fetch.files {
        let Some(kind) = media_kind(&path) else {
            continue;
        };
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        found.push((
            modified,
            name,
            MediaAsset {
                path,
                kind,
                size: meta.len(),
                index: 0,
            },
        ));
    }

    if found.is_empty() {
        return Err(PipelineError::NoMediaFound);
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| natural_cmp(&a.1, &b.1)));
    let assets = found
        .into_iter()
        .enumerate()
        .map(|(index, (_, _, asset))| MediaAsset { index, ..asset })
        .collect();

    Ok(AcquisitionResult {
        assets,
        title: fetch.title,
        description: fetch.description,
        backend,
    })
}
