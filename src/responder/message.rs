//! Conversation messages as seen from the shared identity

use serde::{Deserialize, Serialize};

use crate::format::FormatOffer;

/// Substrings that mark a plain-text reply as an explicit refusal
const FAILURE_MARKERS: &[&str] = &[
    "no media",
    "not found",
    "error",
    "failed",
    "no video",
    "no photo",
];

/// Kind of file attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Native video
    Video,
    /// Native photo
    Photo,
    /// Native audio or voice note
    Audio,
    /// Generic file
    Document,
}

impl AttachmentKind {
    /// Create from a MIME type string
    #[must_use]
    pub fn from_mime(mime_type: &str) -> Self {
        let lower = mime_type.to_lowercase();
        if lower.starts_with("image/") {
            Self::Photo
        } else if lower.starts_with("audio/") {
            Self::Audio
        } else if lower.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }
}

/// File attached to a conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Kind as reported by the transport
    pub kind: AttachmentKind,
    /// Handle the archive store can reuse without re-uploading, if any
    pub file_id: Option<String>,
    /// MIME type, when known
    pub mime_type: Option<String>,
    /// Original filename, when known
    pub file_name: Option<String>,
}

/// Message in a responder conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Monotonic message id within the conversation
    pub id: i64,
    /// Text or caption
    pub text: Option<String>,
    /// Attached file
    pub attachment: Option<Attachment>,
    /// Message only carries a web page preview
    pub link_preview: bool,
    /// Data buttons attached to the message
    pub buttons: Vec<FormatOffer>,
    /// Album grouping id
    pub media_group_id: Option<String>,
    /// Sent by the shared identity itself
    pub outgoing: bool,
}

/// Classification used by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Video, native or by MIME type
    Video,
    /// Still image, native or by MIME type
    Photo,
    /// Audio, native or by MIME type
    Audio,
    /// Any other file
    Document,
    /// Only a link preview, never qualifies
    LinkPreview,
    /// Plain text
    Text,
}

impl MediaKind {
    /// Whether the kind carries a transferable file
    #[must_use]
    pub const fn is_media(self) -> bool {
        matches!(self, Self::Video | Self::Photo | Self::Audio | Self::Document)
    }

    /// Video and audio win tie-breaks over still images
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

impl ConversationMessage {
    /// Classify the message
    ///
    /// Documents are reclassified by MIME type so a video sent as a file still
    /// counts as video.
    #[must_use]
    pub fn classify(&self) -> MediaKind {
        match &self.attachment {
            Some(attachment) => match attachment.kind {
                AttachmentKind::Video => MediaKind::Video,
                AttachmentKind::Photo => MediaKind::Photo,
                AttachmentKind::Audio => MediaKind::Audio,
                AttachmentKind::Document => match attachment
                    .mime_type
                    .as_deref()
                    .map(AttachmentKind::from_mime)
                {
                    Some(AttachmentKind::Video) => MediaKind::Video,
                    Some(AttachmentKind::Photo) => MediaKind::Photo,
                    Some(AttachmentKind::Audio) => MediaKind::Audio,
                    _ => MediaKind::Document,
                },
            },
            None if self.link_preview => MediaKind::LinkPreview,
            None => MediaKind::Text,
        }
    }

    /// Failure text, if this is a plain-text refusal
    #[must_use]
    pub fn failure_text(&self) -> Option<&str> {
        if self.classify() != MediaKind::Text {
            return None;
        }
        let text = self.text.as_deref()?;
        let lower = text.to_lowercase();
        FAILURE_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
            .then_some(text)
    }
}

/// A qualifying media message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Message holding the media
    pub message_id: i64,
    /// Classified kind
    pub kind: MediaKind,
    /// The file itself
    pub attachment: Attachment,
    /// Caption the responder attached
    pub caption: Option<String>,
    /// Album grouping id
    pub media_group_id: Option<String>,
}

impl MediaItem {
    /// Build from a message, if it carries media
    #[must_use]
    pub fn from_message(message: &ConversationMessage) -> Option<Self> {
        let kind = message.classify();
        if !kind.is_media() {
            return None;
        }
        Some(Self {
            message_id: message.id,
            kind,
            attachment: message.attachment.clone()?,
            caption: message.text.clone(),
            media_group_id: message.media_group_id.clone(),
        })
    }
}

/// Media collected from one responder reply, ordered by message id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSet {
    items: Vec<MediaItem>,
}

impl MediaSet {
    /// Create a set, ordering items by message id
    #[must_use]
    pub fn new(mut items: Vec<MediaItem>) -> Self {
        items.sort_by_key(|item| item.message_id);
        items.dedup_by_key(|item| item.message_id);
        Self { items }
    }

    /// Items in message order
    #[must_use]
    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    /// Number of items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The single best item: the newest video or audio, else the newest item
    #[must_use]
    pub fn preferred(&self) -> Option<&MediaItem> {
        self.items
            .iter()
            .rev()
            .find(|item| item.kind.is_primary())
            .or_else(|| self.items.last())
    }
}
