//! Telegram delivery channel.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, FileId, InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, MessageId,
    ParseMode,
};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use super::resilient::{delete_message_safe, send_message_resilient};
use crate::acquire::MediaKind;
use crate::dispatch::{DeliveryChannel, DeliveryError, MediaSource, OutgoingMedia};

const PROGRESS_TEXT: &str = "⏳ Downloading, please wait...";

/// [`DeliveryChannel`] bound to one Telegram chat
pub struct TelegramChannel {
    bot: Bot,
    chat_id: ChatId,
    progress: Mutex<Option<MessageId>>,
}

impl TelegramChannel {
    /// Creates a channel that sends into `chat_id`
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id,
            progress: Mutex::new(None),
        }
    }

    async fn chat_action(&self, action: ChatAction) {
        if let Err(e) = self.bot.send_chat_action(self.chat_id, action).await {
            debug!(error = %e, "Failed to send chat action");
        }
    }
}

fn input_file(source: &MediaSource) -> InputFile {
    match source {
        MediaSource::Upload(path) => InputFile::file(path.clone()),
        MediaSource::Reference(reference) => InputFile::file_id(FileId(reference.clone())),
    }
}

fn input_media(item: &OutgoingMedia) -> InputMedia {
    let file = input_file(&item.source);
    match item.kind {
        MediaKind::Photo => {
            let mut media = InputMediaPhoto::new(file);
            if let Some(caption) = &item.caption {
                media = media.caption(caption.clone()).parse_mode(ParseMode::Html);
            }
            InputMedia::Photo(media)
        }
        MediaKind::Video => {
            let mut media = InputMediaVideo::new(file);
            if let Some(caption) = &item.caption {
                media = media.caption(caption.clone()).parse_mode(ParseMode::Html);
            }
            InputMedia::Video(media)
        }
    }
}

/// File id of the largest photo size, or of the video
fn sent_reference(msg: &Message) -> Option<String> {
    if let Some(sizes) = msg.photo() {
        return sizes.last().map(|p| p.file.id.to_string());
    }
    msg.video().map(|v| v.file.id.to_string())
}

fn is_replay(items: &[OutgoingMedia]) -> bool {
    items
        .iter()
        .any(|i| matches!(i.source, MediaSource::Reference(_)))
}

fn classify(err: RequestError, replay: bool) -> DeliveryError {
    match err {
        RequestError::Api(ApiError::WrongFileId | ApiError::WrongFileIdOrUrl) if replay => {
            DeliveryError::StaleReference
        }
        other => DeliveryError::Failed(other.to_string()),
    }
}

fn missing_reference() -> DeliveryError {
    DeliveryError::Failed("sent message carries no media".to_string())
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send_single(&self, item: &OutgoingMedia) -> Result<String, DeliveryError> {
        let replay = is_replay(std::slice::from_ref(item));
        let file = input_file(&item.source);

        let sent = match item.kind {
            MediaKind::Photo => {
                self.chat_action(ChatAction::UploadPhoto).await;
                let mut req = self.bot.send_photo(self.chat_id, file);
                if let Some(caption) = &item.caption {
                    req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                }
                req.await
            }
            MediaKind::Video => {
                self.chat_action(ChatAction::UploadVideo).await;
                let mut req = self.bot.send_video(self.chat_id, file);
                if let Some(caption) = &item.caption {
                    req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                }
                req.await
            }
        }
        .map_err(|e| classify(e, replay))?;

        sent_reference(&sent).ok_or_else(missing_reference)
    }

    async fn send_batch(&self, items: &[OutgoingMedia]) -> Result<Vec<String>, DeliveryError> {
        let replay = is_replay(items);
        self.chat_action(ChatAction::UploadDocument).await;

        let media: Vec<InputMedia> = items.iter().map(input_media).collect();
        let sent = self
            .bot
            .send_media_group(self.chat_id, media)
            .await
            .map_err(|e| classify(e, replay))?;

        sent.iter()
            .map(|m| sent_reference(m).ok_or_else(missing_reference))
            .collect()
    }

    async fn acquisition_started(&self) {
        match send_message_resilient(&self.bot, self.chat_id, PROGRESS_TEXT, None).await {
            Ok(msg) => {
                *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(msg.id);
            }
            Err(e) => warn!(error = %e, "Failed to post progress message"),
        }
    }

    async fn acquisition_finished(&self) {
        let progress = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(msg_id) = progress {
            delete_message_safe(&self.bot, self.chat_id, msg_id).await;
        }
    }
}
