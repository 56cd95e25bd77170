//! Text helpers and the Telegram API retry wrapper.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use reel_relay::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Keeps the first `max_graphemes` grapheme clusters and appends `...` when
/// anything was cut. Emoji and combined characters are never split.
///
/// # Examples
///
/// ```
/// use reel_relay::utils::truncate_with_ellipsis;
/// assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
/// assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
/// ```
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_graphemes: usize) -> String {
    let mut graphemes = s.grapheme_indices(true);
    match graphemes.nth(max_graphemes) {
        Some((pos, _)) => format!("{}...", &s[..pos]),
        None => s.to_string(),
    }
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Used for plain text messages (progress notices, replies, admin reports)
/// that may fail due to transient network errors. Media sends are not routed
/// through here because a rejected file reference must surface immediately.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (see constants in `config.rs`)
///
/// # Examples
///
/// ```no_run
/// use reel_relay::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn notify() -> Result<()> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<()> {
/// retry_telegram_operation(|| async { notify().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_truncate_with_ellipsis_keeps_graphemes_whole() {
        // family emoji is one grapheme made of several code points
        let s = "👨‍👩‍👧👨‍👩‍👧👨‍👩‍👧";
        assert_eq!(truncate_with_ellipsis(s, 1), "👨‍👩‍👧...");
        assert_eq!(truncate_with_ellipsis(s, 3), s);
        assert_eq!(truncate_with_ellipsis("", 0), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_telegram_operation_recovers() {
        let calls = AtomicUsize::new(0);
        let value = retry_telegram_operation(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset");
            }
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_telegram_operation_gives_up() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_telegram_operation(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;

        assert!(result.is_err());
        // first try plus one per backoff step
        assert_eq!(
            calls.load(Ordering::SeqCst),
            crate::config::TELEGRAM_API_MAX_RETRIES + 1
        );
    }
}
