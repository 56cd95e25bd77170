//! Delivery channel capability.
//!
//! A channel is bound to one destination (a chat) and sends media either by
//! uploading a local file or by replaying a reference it assigned earlier.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::acquire::MediaKind;

/// Where the bytes of an outgoing item come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Local file to upload
    Upload(PathBuf),
    /// Reference previously returned by the channel
    Reference(String),
}

/// One item handed to the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    /// Photo or video
    pub kind: MediaKind,
    /// File or stored reference
    pub source: MediaSource,
    /// HTML caption, only ever set on the first item of a delivery
    pub caption: Option<String>,
}

impl OutgoingMedia {
    /// Uncaptioned item
    #[must_use]
    pub const fn new(kind: MediaKind, source: MediaSource) -> Self {
        Self {
            kind,
            source,
            caption: None,
        }
    }
}

/// Channel send failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// A stored reference was rejected by the channel
    #[error("channel rejected a stored media reference")]
    StaleReference,
    /// Any other send failure
    #[error("send failed: {0}")]
    Failed(String),
}

/// Media delivery to one destination
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Sends one item and returns the reference the channel assigned to it
    async fn send_single(&self, item: &OutgoingMedia) -> Result<String, DeliveryError>;

    /// Sends 2..=10 items as one group and returns their references in order
    async fn send_batch(&self, items: &[OutgoingMedia]) -> Result<Vec<String>, DeliveryError>;

    /// Called before a fresh acquisition starts
    async fn acquisition_started(&self);

    /// Called once a fresh acquisition has ended, on every path
    async fn acquisition_finished(&self);
}
