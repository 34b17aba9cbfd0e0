//! Gateway request/response types

use serde::{Deserialize, Serialize};

use crate::format::FormatOffer;
use crate::responder::{Attachment, AttachmentKind, ConversationMessage};

/// Response envelope shared by every gateway method
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
}

/// sendMessage request
#[derive(Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub disable_web_page_preview: bool,
}

/// getChatHistory request
#[derive(Serialize)]
pub(crate) struct ChatHistoryRequest<'a> {
    pub chat_id: &'a str,
    pub limit: usize,
}

/// getCallbackQueryAnswer request, which presses an inline button
#[derive(Serialize)]
pub(crate) struct CallbackQueryRequest<'a> {
    pub chat_id: &'a str,
    pub message_id: i64,
    pub data: &'a str,
}

/// getChat request
#[derive(Serialize)]
pub(crate) struct GetChatRequest<'a> {
    pub chat_id: &'a str,
}

/// getMessageFile request
#[derive(Serialize)]
pub(crate) struct MessageFileRequest<'a> {
    pub chat_id: &'a str,
    pub message_id: i64,
}

/// sendVideo / sendPhoto / sendAudio / sendDocument by file id
pub(crate) struct SendFileRequest<'a> {
    pub chat_id: i64,
    pub field: &'static str,
    pub file_id: &'a str,
    pub caption: &'a str,
}

impl SendFileRequest<'_> {
    /// JSON body with the file field named after the media kind
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": self.chat_id,
            "caption": self.caption,
        });
        body[self.field] = serde_json::Value::String(self.file_id.to_string());
        body
    }
}

/// One entry of sendMediaGroup
#[derive(Debug, Serialize)]
pub(crate) struct InputMedia {
    #[serde(rename = "type")]
    pub media_type: &'static str,
    /// File id, or `attach://<part>` for multipart uploads
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Sent message returned by send* methods
#[derive(Debug, Deserialize)]
pub(crate) struct SentMessage {
    pub message_id: i64,
}

/// File metadata from getFile / getMessageFile
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayFile {
    pub file_path: Option<String>,
}

/// Identity returned by getMe
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Chat returned by getChat
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayChat {
    pub id: i64,
}

/// File descriptor on a history message
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileInfo {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Inline keyboard on a history message
#[derive(Debug, Deserialize)]
pub(crate) struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

/// One inline button
#[derive(Debug, Deserialize)]
pub(crate) struct InlineButton {
    pub text: String,
    #[serde(default)]
    pub callback_data: Option<String>,
}

/// Message returned by getChatHistory
#[derive(Debug, Deserialize)]
pub(crate) struct HistoryMessage {
    pub message_id: i64,
    #[serde(default)]
    pub outgoing: bool,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub video: Option<FileInfo>,
    pub animation: Option<FileInfo>,
    pub photo: Option<Vec<FileInfo>>,
    pub audio: Option<FileInfo>,
    pub voice: Option<FileInfo>,
    pub document: Option<FileInfo>,
    pub link_preview_options: Option<serde_json::Value>,
    pub media_group_id: Option<String>,
    pub reply_markup: Option<InlineKeyboard>,
}

impl HistoryMessage {
    /// Convert to the transport-neutral message
    ///
    /// Only buttons with callback data become offers; URL buttons cannot be
    /// pressed through the gateway.
    pub fn into_conversation(self) -> ConversationMessage {
        let attachment = self.attachment();
        let link_preview = attachment.is_none()
            && self.link_preview_options.as_ref().is_some_and(|options| {
                !options
                    .get("is_disabled")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false)
            });

        let message_id = self.message_id;
        let buttons = self
            .reply_markup
            .map(|markup| {
                markup
                    .inline_keyboard
                    .into_iter()
                    .flatten()
                    .filter_map(|button| {
                        let data = button.callback_data?;
                        Some(FormatOffer::new(message_id, button.text, data))
                    })
                    .collect()
            })
            .unwrap_or_default();

        ConversationMessage {
            id: message_id,
            text: self.text.or(self.caption),
            attachment,
            link_preview,
            buttons,
            media_group_id: self.media_group_id,
            outgoing: self.outgoing,
        }
    }

    fn attachment(&self) -> Option<Attachment> {
        let (kind, info) = if let Some(info) = self.video.as_ref().or(self.animation.as_ref()) {
            (AttachmentKind::Video, info.clone())
        } else if let Some(info) = self.photo.as_ref().and_then(|sizes| sizes.last()) {
            // Sizes are ordered smallest first
            (AttachmentKind::Photo, info.clone())
        } else if let Some(info) = self.audio.as_ref().or(self.voice.as_ref()) {
            (AttachmentKind::Audio, info.clone())
        } else if let Some(info) = &self.document {
            (AttachmentKind::Document, info.clone())
        } else {
            return None;
        };

        Some(Attachment {
            kind,
            file_id: info.file_id,
            mime_type: info.mime_type,
            file_name: info.file_name,
        })
    }
}
