//! Text message helpers with automatic retry for Telegram API operations.
//!
//! Progress notices, replies and admin reports go through here. They retry on
//! transient network failures using exponential backoff with jitter.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use tracing::{debug, warn};

/// Send a message with automatic retry on network failures.
///
/// Uses [`crate::utils::retry_telegram_operation`] with exponential backoff
/// to handle transient network errors.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Delete a message, tolerating messages that are already gone.
///
/// # Returns
///
/// `true` if the message was deleted.
pub async fn delete_message_safe(bot: &Bot, chat_id: ChatId, msg_id: MessageId) -> bool {
    const ERROR_NOT_FOUND: &str = "message to delete not found";

    let result = crate::utils::retry_telegram_operation(|| async {
        bot.delete_message(chat_id, msg_id)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram delete error: {e}"))
    })
    .await;

    match result {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Message already deleted: {err_msg}");
            } else {
                warn!("Failed to delete message after retries: {e}");
            }
            false
        }
    }
}
