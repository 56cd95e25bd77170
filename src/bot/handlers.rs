//! Telegram command and message handlers.

// lazy_regex! statics use once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use super::channel::TelegramChannel;
use super::resilient::send_message_resilient;
use crate::acquire::normalize;
use crate::error::PipelineError;
use crate::pipeline::{AcquisitionRequest, Coordinator};
use crate::utils::truncate_str;

/// Candidate content links: optional scheme, a host, then a content path
static RE_CONTENT_URL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(
    r#"(?i)(?:https?://)?(?:[a-z0-9-]+\.)+[a-z]{2,}(?::\d+)?/(?:p|reels?|tv|video|stories)/[^\s<>"']+"#
);

const START_TEXT: &str = "👋 Hi! Send me a link to a post, reel or story and I will send the media back.";
const HELP_TEXT: &str = "📎 Paste a post, reel, TV or story link.\n\n\
Carousels arrive as albums. Links that were downloaded recently are sent instantly.";
const NO_LINK_TEXT: &str = "❌ Please send a valid post, reel or story link.";

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage help
    #[command(description = "How to use the bot.")]
    Help,
}

/// Configured administrator ids
#[derive(Debug, Clone, Default)]
pub struct Admins(pub HashSet<i64>);

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Returns the first recognized content link inside `text`
#[must_use]
pub fn find_content_url(text: &str) -> Option<&str> {
    RE_CONTENT_URL
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|candidate| normalize(candidate).is_ok())
}

/// Handles /start and /help
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> Result<()> {
    let text = match cmd {
        Command::Start => START_TEXT,
        Command::Help => HELP_TEXT,
    };
    send_message_resilient(&bot, msg.chat.id, text, None).await?;
    Ok(())
}

/// Handles a plain text message: finds a link and runs the pipeline for it
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    coordinator: Arc<Coordinator>,
    admins: Arc<Admins>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let Some(link) = find_content_url(text) else {
        if msg.chat.is_private() {
            send_message_resilient(&bot, msg.chat.id, NO_LINK_TEXT, None).await?;
        }
        return Ok(());
    };

    info!(user_id, "Received content link");
    let request = AcquisitionRequest::new(user_id, link);
    let channel = TelegramChannel::new(bot.clone(), msg.chat.id);

    match coordinator.handle(&request, &channel).await {
        Ok(delivery) => {
            info!(user_id, items = delivery.count(), "Delivered");
        }
        Err(e) => {
            send_message_resilient(&bot, msg.chat.id, e.user_message(), None).await?;
            if !matches!(e, PipelineError::InvalidUrl(_)) {
                notify_admins(&bot, &admins, &request, &e).await;
            }
        }
    }
    Ok(())
}

/// Admin report text for a failed request (HTML)
#[must_use]
pub fn failure_report(request: &AcquisitionRequest, err: &PipelineError) -> String {
    let url = normalize(&request.raw_url)
        .map_or_else(|_| request.raw_url.clone(), |u| u.as_str().to_string());
    format!(
        "⚠️ <b>Request failed</b>\nKind: <code>{}</code>\nUser: <code>{}</code>\nURL: {}\nRequest: <code>{}</code>\n\n{}",
        err.label(),
        request.requester,
        html_escape::encode_text(&url),
        request.id,
        html_escape::encode_text(&truncate_str(err.to_string(), 1000))
    )
}

async fn notify_admins(bot: &Bot, admins: &Admins, request: &AcquisitionRequest, err: &PipelineError) {
    if admins.0.is_empty() {
        return;
    }
    let report = failure_report(request, err);
    for &admin in &admins.0 {
        if let Err(e) =
            send_message_resilient(bot, ChatId(admin), report.clone(), Some(ParseMode::Html)).await
        {
            warn!(admin, error = %e, "Failed to notify admin");
        }
    }
}

/// Logs handler errors without failing the update dispatcher
pub fn log_handler_error(context: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("{context} error: {e}");
    }
}
