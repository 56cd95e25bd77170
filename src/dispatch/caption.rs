//! Caption rendering (Telegram HTML).

use crate::config::{CAPTION_LIMIT, DESCRIPTION_PREVIEW_CHARS};
use crate::utils::truncate_with_ellipsis;

const SEPARATOR: &str = "\n\n";

/// Caption markup together with the text the reader sees
#[derive(Default)]
struct Rendered {
    html: String,
    plain: String,
}

impl Rendered {
    fn push(&mut self, plain: &str, html: &str) {
        if !self.html.is_empty() {
            self.html.push_str(SEPARATOR);
            self.plain.push_str(SEPARATOR);
        }
        self.html.push_str(html);
        self.plain.push_str(plain);
    }

    /// Telegram counts the caption limit in UTF-16 units after entity parsing
    fn visible_len(&self) -> usize {
        self.plain.encode_utf16().count()
    }
}

fn footer(bot_username: Option<&str>) -> Option<Rendered> {
    let name = bot_username.filter(|name| !name.is_empty())?;
    let mut footer = Rendered::default();
    footer.push(
        &format!("📥 Downloaded via @{name}"),
        &format!("📥 Downloaded via @{}", html_escape::encode_text(name)),
    );
    Some(footer)
}

fn render(title: &str, description: Option<&str>, bot_username: Option<&str>) -> Rendered {
    let mut caption = Rendered::default();
    let title = title.trim();
    if !title.is_empty() {
        caption.push(
            &format!("🎬 {title}"),
            &format!("🎬 <b>{}</b>", html_escape::encode_text(title)),
        );
    }
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        let preview = truncate_with_ellipsis(description, DESCRIPTION_PREVIEW_CHARS);
        caption.push(
            &format!("📝 {preview}"),
            &format!("📝 {}", html_escape::encode_text(&preview)),
        );
    }
    if let Some(footer) = footer(bot_username) {
        caption.push(&footer.plain, &footer.html);
    }
    caption
}

/// Clips a rendered caption to the channel limit.
///
/// Falls back to the title line alone, then to the footer, so markup is never
/// cut mid-tag.
fn fit(caption: Rendered, title: &str, bot_username: Option<&str>) -> Option<String> {
    if caption.html.is_empty() {
        return None;
    }
    if caption.visible_len() <= CAPTION_LIMIT {
        return Some(caption.html);
    }
    let short = render(title, None, bot_username);
    if !short.html.is_empty() && short.visible_len() <= CAPTION_LIMIT {
        return Some(short.html);
    }
    footer(bot_username).map(|footer| footer.html)
}

/// Caption for a fresh delivery: title, description preview and footer
#[must_use]
pub fn full_caption(title: &str, description: &str, bot_username: Option<&str>) -> Option<String> {
    fit(render(title, Some(description), bot_username), title, bot_username)
}

/// Caption for a cache replay. The description is not cached, so only the
/// title and footer are available.
#[must_use]
pub fn replay_caption(title: &str, bot_username: Option<&str>) -> Option<String> {
    fit(render(title, None, bot_username), title, bot_username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_caption_layout() {
        let caption = full_caption("alice", "sunny day", Some("relay_bot")).unwrap();
        assert_eq!(
            caption,
            "🎬 <b>alice</b>\n\n📝 sunny day\n\n📥 Downloaded via @relay_bot"
        );
    }

    #[test]
    fn test_description_preview_is_truncated() {
        let description = "x".repeat(500);
        let caption = full_caption("t", &description, None).unwrap();
        let preview = caption.split("📝 ").nth(1).unwrap();
        assert_eq!(preview, format!("{}...", "x".repeat(200)));
    }

    #[test]
    fn test_html_is_escaped() {
        let caption = full_caption("<script>", "a & b", None).unwrap();
        assert!(caption.contains("<b>&lt;script&gt;</b>"));
        assert!(caption.contains("a &amp; b"));
    }

    #[test]
    fn test_replay_caption_has_no_description() {
        let caption = replay_caption("alice", Some("relay_bot")).unwrap();
        assert_eq!(caption, "🎬 <b>alice</b>\n\n📥 Downloaded via @relay_bot");
    }

    #[test]
    fn test_empty_everything_is_none() {
        assert_eq!(full_caption("", "  ", None), None);
        assert_eq!(replay_caption("", None), None);
    }

    #[test]
    fn test_escaping_does_not_count_against_limit() {
        let title = "&".repeat(400);
        let caption = full_caption(&title, &"y".repeat(300), Some("bot")).unwrap();
        assert!(caption.chars().count() > CAPTION_LIMIT);
        assert!(caption.contains(&"&amp;".repeat(400)));
        assert!(caption.contains("📝 "));
        assert!(caption.ends_with("📥 Downloaded via @bot"));
    }

    #[test]
    fn test_long_title_drops_description_first() {
        let title = "a".repeat(900);
        let caption = full_caption(&title, &"y".repeat(300), Some("bot")).unwrap();
        assert_eq!(
            caption,
            format!("🎬 <b>{title}</b>\n\n📥 Downloaded via @bot")
        );
    }

    #[test]
    fn test_oversized_title_falls_back_to_footer() {
        let title = "😀".repeat(600);
        let caption = full_caption(&title, "desc", Some("bot")).unwrap();
        assert_eq!(caption, "📥 Downloaded via @bot");
        assert_eq!(full_caption(&title, "desc", None), None);
    }
}
