//! OpenGraph backend - scrapes the public post page for `og:video` /
//! `og:image` tags and downloads the referenced media over HTTP.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use async_trait::async_trait;
use lazy_regex::lazy_regex;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::acquire::backend::{ExtractionBackend, RawFetch};
use crate::acquire::url::CanonicalUrl;
use crate::acquire::MediaKind;
use crate::error::FetchError;

/// Any `<meta ...>` tag
static RE_META_TAG: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)<meta\s[^>]*>");

/// `property="..."` or `name="..."` attribute
static RE_META_KEY: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r#"(?i)\b(?:property|name)\s*=\s*["']([^"']+)["']"#);

/// `content="..."` attribute
static RE_META_CONTENT: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r#"(?i)\bcontent\s*=\s*"([^"]*)""#);

const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; facebookexternalhit/1.1; +http://www.facebook.com/externalhit_uatext.php)";

/// OpenGraph data of a post page
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OgTags {
    /// `og:title`
    pub title: Option<String>,
    /// `og:description`
    pub description: Option<String>,
    /// `og:video` / `og:video:secure_url`, de-duplicated
    pub videos: Vec<String>,
    /// `og:image`, de-duplicated
    pub images: Vec<String>,
}

impl OgTags {
    /// Media to download: videos when present, images otherwise
    #[must_use]
    pub fn media(&self) -> Vec<(MediaKind, &str)> {
        if self.videos.is_empty() {
            self.images
                .iter()
                .map(|u| (MediaKind::Photo, u.as_str()))
                .collect()
        } else {
            self.videos
                .iter()
                .map(|u| (MediaKind::Video, u.as_str()))
                .collect()
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

/// Extracts OpenGraph tags from an HTML page
#[must_use]
pub fn parse_og_tags(html: &str) -> OgTags {
    let mut tags = OgTags::default();

    for tag in RE_META_TAG.find_iter(html) {
        let tag = tag.as_str();
        let Some(key) = RE_META_KEY.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let Some(content) = RE_META_CONTENT.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let content = html_escape::decode_html_entities(content.as_str()).into_owned();

        match key.as_str().to_lowercase().as_str() {
            "og:title" => tags.title = Some(content),
            "og:description" => tags.description = Some(content),
            "og:video" | "og:video:url" | "og:video:secure_url" => {
                push_unique(&mut tags.videos, content);
            }
            "og:image" | "og:image:url" | "og:image:secure_url" => {
                push_unique(&mut tags.images, content);
            }
            _ => {}
        }
    }

    tags
}

fn classify_status(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            FetchError::Permanent(format!("HTTP {status}"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::AuthRequired(format!("HTTP {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("HTTP {status}"))
        }
        s if s.is_server_error() => FetchError::Transient(format!("HTTP {status}")),
        _ => FetchError::Unknown(format!("HTTP {status}")),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Unknown(e.to_string())
    }
}

/// File extension for a downloaded media URL
fn extension_for(media_url: &str, content_type: Option<&str>, kind: MediaKind) -> &'static str {
    let by_type = content_type.and_then(|ct| {
        let ct = ct.split(';').next().unwrap_or(ct).trim();
        match ct {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "video/mp4" => Some("mp4"),
            "video/quicktime" => Some("mov"),
            "video/webm" => Some("webm"),
            _ => None,
        }
    });
    if let Some(ext) = by_type {
        return ext;
    }

    let path = media_url.split(['?', '#']).next().unwrap_or(media_url);
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match (ext.as_str(), kind) {
        ("png", _) => "png",
        ("webp", _) => "webp",
        ("mov", _) => "mov",
        ("webm", _) => "webm",
        (_, MediaKind::Video) => "mp4",
        (_, MediaKind::Photo) => "jpg",
    }
}

/// Provider that reads OpenGraph tags from the public page
pub struct OpenGraphBackend {
    client: Client,
}

impl OpenGraphBackend {
    /// Create a new backend with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }

    async fn download(
        &self,
        media_url: &str,
        kind: MediaKind,
        target_stem: &Path,
    ) -> Result<std::path::PathBuf, FetchError> {
        let resp = self
            .client
            .get(media_url)
            .send()
            .await
            .map_err(classify_request_error)?;
        classify_status(resp.status())?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(classify_request_error)?;

        let path = target_stem.with_extension(extension_for(
            media_url,
            content_type.as_deref(),
            kind,
        ));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| FetchError::Unknown(format!("cannot write media file: {e}")))?;
        Ok(path)
    }
}

#[async_trait]
impl ExtractionBackend for OpenGraphBackend {
    fn name(&self) -> &'static str {
        "opengraph"
    }

    async fn fetch(&self, url: &CanonicalUrl, workspace: &Path) -> Result<RawFetch, FetchError> {
        let resp = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_request_error)?;
        classify_status(resp.status())?;

        if resp.url().path().starts_with("/accounts/login") {
            return Err(FetchError::AuthRequired(
                "redirected to login page".to_string(),
            ));
        }

        let html = resp.text().await.map_err(classify_request_error)?;
        let tags = parse_og_tags(&html);
        let media = tags.media();
        if media.is_empty() {
            warn!(url = %url, "No OpenGraph media tags on page");
            return Err(FetchError::Unknown("page has no media tags".to_string()));
        }

        let mut files = Vec::with_capacity(media.len());
        for (i, (kind, media_url)) in media.into_iter().enumerate() {
            let stem = workspace.join(format!("og_{i:02}"));
            files.push(self.download(media_url, kind, &stem).await?);
        }
        debug!(url = %url, files = files.len(), "OpenGraph download finished");

        Ok(RawFetch {
            files,
            title: tags.title.unwrap_or_default(),
            description: tags.description.unwrap_or_default(),
        })
    }
}
