//! URL canonicalization.
//!
//! Pure and deterministic: no I/O. The canonical form is
//! `https://{host}/{kind}/{id}` (stories: `https://{host}/stories/{owner}[/{id}]`)
//! with the host lower-cased and a leading `www.` dropped. Query strings,
//! fragments, trailing slashes and segments after the identifier are removed.
//! Identifier case is preserved.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use reqwest::Url;
use std::fmt;

use crate::error::PipelineError;

/// `/{kind}/{id}[/{id}]` at the start of a content path
static RE_CONTENT_PATH: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^/(p|reel|reels|tv|video|stories)/([A-Za-z0-9_.\-]+)(?:/([A-Za-z0-9_\-]+))?");

/// Explicit scheme at the start of the input
static RE_SCHEME: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^[A-Za-z][A-Za-z0-9+.\-]*://");

/// Content type addressed by a canonical URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// `/p/{shortcode}`
    Post,
    /// `/reel/{shortcode}` (alias `/reels/`)
    Reel,
    /// `/tv/{shortcode}`
    Tv,
    /// `/video/{id}`
    Video,
    /// `/stories/{owner}[/{id}]`
    Story,
}

impl ContentKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "p" => Some(Self::Post),
            "reel" | "reels" => Some(Self::Reel),
            "tv" => Some(Self::Tv),
            "video" => Some(Self::Video),
            "stories" => Some(Self::Story),
            _ => None,
        }
    }

    /// Canonical path segment
    #[must_use]
    pub const fn segment(self) -> &'static str {
        match self {
            Self::Post => "p",
            Self::Reel => "reel",
            Self::Tv => "tv",
            Self::Video => "video",
            Self::Story => "stories",
        }
    }

    /// Whether the identifier is a post shortcode
    #[must_use]
    pub const fn has_shortcode(self) -> bool {
        matches!(self, Self::Post | Self::Reel | Self::Tv)
    }
}

/// Normalized content URL, used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    url: String,
    kind: ContentKind,
    identifier: String,
}

impl CanonicalUrl {
    /// Canonical URL text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Addressed content type
    #[must_use]
    pub const fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Shortcode or id. For stories this is the owner, or `owner/id`.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

/// Canonicalizes a raw content URL.
///
/// A missing scheme is treated as `https`.
///
/// # Examples
///
/// ```
/// use reel_relay::acquire::normalize;
///
/// let key = normalize("https://X.Example/p/ABC/?utm=1#top").unwrap();
/// assert_eq!(key.as_str(), "https://x.example/p/ABC");
/// ```
///
/// # Errors
///
/// Returns [`PipelineError::InvalidUrl`] when the input is not an http(s)
/// URL or its path is not a recognized post/reel/video/story shape.
pub fn normalize(raw: &str) -> Result<CanonicalUrl, PipelineError> {
    let trimmed = raw.trim();
    let invalid = || PipelineError::InvalidUrl(trimmed.to_string());

    let parsed = if RE_SCHEME.is_match(trimmed) {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("https://{trimmed}"))
    }
    .map_err(|_| invalid())?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let host = parsed.host_str().ok_or_else(invalid)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return Err(invalid());
    }
    // the canonical scheme is always https, so both web defaults collapse
    let authority = match parsed.port_or_known_default() {
        Some(80 | 443) | None => host.to_string(),
        Some(port) => format!("{host}:{port}"),
    };

    let caps = RE_CONTENT_PATH.captures(parsed.path()).ok_or_else(invalid)?;
    let kind = caps
        .get(1)
        .and_then(|m| ContentKind::from_segment(m.as_str()))
        .ok_or_else(invalid)?;
    let first = caps.get(2).map(|m| m.as_str()).ok_or_else(invalid)?;

    let identifier = match (kind, caps.get(3)) {
        (ContentKind::Story, Some(id)) => format!("{first}/{}", id.as_str()),
        _ => first.to_string(),
    };

    Ok(CanonicalUrl {
        url: format!("https://{authority}/{}/{identifier}", kind.segment()),
        kind,
        identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_query_fragment_and_slash() {
        let key = normalize("https://x.example/p/ABC?utm=1").unwrap();
        assert_eq!(key.as_str(), "https://x.example/p/ABC");
        assert_eq!(
            normalize("https://x.example/p/ABC/#frag").unwrap(),
            key
        );
    }

    #[test]
    fn test_identifier_case_is_preserved() {
        let upper = normalize("https://x.example/p/ABC").unwrap();
        let lower = normalize("https://x.example/p/abc/").unwrap();
        assert_ne!(upper, lower);
        assert_eq!(lower.as_str(), "https://x.example/p/abc");
    }

    #[test]
    fn test_host_is_case_folded_and_www_dropped() {
        let key = normalize("http://WWW.Instagram.COM/reel/Cx1_-9/").unwrap();
        assert_eq!(key.as_str(), "https://instagram.com/reel/Cx1_-9");
    }

    #[test]
    fn test_reels_alias_collapses_to_reel() {
        let a = normalize("https://instagram.com/reels/XyZ").unwrap();
        let b = normalize("https://instagram.com/reel/XyZ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.kind(), ContentKind::Reel);
    }

    #[test]
    fn test_trailing_segments_after_shortcode_are_dropped() {
        let key = normalize("https://instagram.com/p/ABC/embed/captioned/").unwrap();
        assert_eq!(key.as_str(), "https://instagram.com/p/ABC");
    }

    #[test]
    fn test_story_keeps_owner_and_id() {
        let key = normalize("https://instagram.com/stories/some.user/3141592/?igsh=x").unwrap();
        assert_eq!(key.as_str(), "https://instagram.com/stories/some.user/3141592");
        assert_eq!(key.identifier(), "some.user/3141592");
        assert!(!key.kind().has_shortcode());
    }

    #[test]
    fn test_missing_scheme_defaults_to_https() {
        let key = normalize("instagram.com/p/ABC").unwrap();
        assert_eq!(key.as_str(), "https://instagram.com/p/ABC");
    }

    #[test]
    fn test_default_ports_are_dropped_for_any_scheme() {
        for raw in [
            "http://x.example:443/p/ABC",
            "https://x.example:80/p/ABC",
            "http://x.example:80/p/ABC",
            "https://x.example:443/p/ABC",
        ] {
            let once = normalize(raw).unwrap();
            assert_eq!(once.as_str(), "https://x.example/p/ABC", "for {raw:?}");
            assert_eq!(normalize(once.as_str()).unwrap(), once);
        }
    }

    #[test]
    fn test_custom_port_is_kept() {
        let key = normalize("http://x.example:8080/p/ABC").unwrap();
        assert_eq!(key.as_str(), "https://x.example:8080/p/ABC");
        assert_eq!(normalize(key.as_str()).unwrap(), key);
    }

    #[test]
    fn test_scheme_less_link_with_url_in_query() {
        let key = normalize("instagram.com/p/ABC/?next=https://x.example/").unwrap();
        assert_eq!(key.as_str(), "https://instagram.com/p/ABC");
    }

    #[test]
    fn test_rejects_unrecognized_shapes() {
        for raw in [
            "",
            "not a url",
            "https://instagram.com/",
            "https://instagram.com/someprofile/",
            "https://instagram.com/explore/tags/rust",
            "ftp://instagram.com/p/ABC",
            "https://instagram.com/p/",
        ] {
            assert!(
                matches!(normalize(raw), Err(PipelineError::InvalidUrl(_))),
                "expected InvalidUrl for {raw:?}"
            );
        }
    }

    fn content_url() -> impl Strategy<Value = (String, String, String)> {
        (
            prop_oneof![Just("p"), Just("reel"), Just("reels"), Just("tv")],
            "[A-Za-z0-9_-]{1,16}",
            prop_oneof![Just("x.example"), Just("X.Example"), Just("www.x.example")],
        )
            .prop_map(|(kind, id, host)| (kind.to_string(), id, host.to_string()))
    }

    fn scheme_and_port() -> impl Strategy<Value = (&'static str, &'static str)> {
        (
            prop_oneof![Just("http"), Just("https")],
            prop_oneof![Just(""), Just(":80"), Just(":443"), Just(":8080")],
        )
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(
            (kind, id, host) in content_url(),
            (scheme, port) in scheme_and_port(),
        ) {
            let once = normalize(&format!("{scheme}://{host}{port}/{kind}/{id}")).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_query_fragment_and_slash_do_not_matter(
            (kind, id, host) in content_url(),
            query in "[a-z]{1,5}=[a-z0-9]{0,5}",
            fragment in "[a-z]{0,6}",
            slash in any::<bool>(),
        ) {
            let base = normalize(&format!("https://{host}/{kind}/{id}")).unwrap();
            let trailing = if slash { "/" } else { "" };
            let decorated = format!("https://{host}/{kind}/{id}{trailing}?{query}#{fragment}");
            prop_assert_eq!(normalize(&decorated).unwrap(), base);
        }
    }
}
