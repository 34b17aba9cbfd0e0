//! HTTP gateway in front of the shared user session
//!
//! The gateway exposes the logged-in user account through a Bot-API-shaped
//! interface: `POST {base}/bot{token}/{method}` with JSON or multipart bodies
//! and an `{ok, result, description}` envelope. One client serves both the
//! responder conversations and the archive location.

mod api;
pub mod retry;
pub(crate) mod types;

use std::num::NonZeroU32;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::SecretString;

use crate::archive::{ArchiveReference, ArchiveStore, UploadItem, UploadPayload};
use crate::responder::{AttachmentKind, ConversationMessage, ResponderTransport};
use crate::format::SelectionToken;
use crate::{Error, Result};

pub use retry::RetryPolicy;

use types::{
    CallbackQueryRequest, ChatHistoryRequest, GatewayChat, GatewayFile, GatewayUser,
    GetChatRequest, HistoryMessage, InputMedia, MessageFileRequest, SendFileRequest,
    SendMessageRequest, SentMessage,
};

/// Outbound pacing shared by every call
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a limiter allowing `requests_per_second` calls
#[must_use]
pub fn create_limiter(requests_per_second: u32) -> SharedLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}

/// Gateway connection settings
#[derive(Debug)]
pub struct GatewaySettings {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Access token
    pub token: SecretString,
    /// Archive location (storage chat)
    pub storage_chat_id: i64,
    /// Outbound calls per second
    pub requests_per_second: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retry behavior for transient failures
    pub retry: RetryPolicy,
}

/// Client for the session gateway
pub struct GatewayClient {
    base_url: String,
    token: SecretString,
    storage_chat_id: i64,
    request_timeout: Duration,
    retry: RetryPolicy,
    limiter: SharedLimiter,
    client: RwLock<Option<Client>>,
}

impl GatewayClient {
    /// Create a connected client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let client = build_client(settings.request_timeout)?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token,
            storage_chat_id: settings.storage_chat_id,
            request_timeout: settings.request_timeout,
            retry: settings.retry,
            limiter: create_limiter(settings.requests_per_second),
            client: RwLock::new(Some(client)),
        })
    }

    /// Archive location this client uploads into
    #[must_use]
    pub const fn storage_chat_id(&self) -> i64 {
        self.storage_chat_id
    }

    /// Identity behind the gateway, as `(id, username)`
    ///
    /// # Errors
    ///
    /// Returns error if the gateway call fails
    pub async fn whoami(&self) -> Result<(i64, Option<String>)> {
        let me: GatewayUser = self.call("getMe", &serde_json::json!({})).await?;
        Ok((me.id, me.username))
    }

    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Gateway("gateway client disconnected".to_string()))
    }

    async fn message_file(&self, chat_id: &str, message_id: i64) -> Result<Vec<u8>> {
        let file: GatewayFile = self
            .call(
                "getMessageFile",
                &MessageFileRequest {
                    chat_id,
                    message_id,
                },
            )
            .await?;
        let path = file
            .file_path
            .ok_or_else(|| Error::Gateway(format!("message {message_id} has no file")))?;
        self.download_file(&path).await
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Gateway(format!("failed to build http client: {e}")))
}

/// Numeric ids pass through; usernames get their `@`
fn chat_ref(conversation: &str) -> String {
    if conversation.starts_with('@') || conversation.parse::<i64>().is_ok() {
        conversation.to_string()
    } else {
        format!("@{conversation}")
    }
}

/// Gateway method and file field for an upload kind
const fn send_method(kind: AttachmentKind) -> (&'static str, &'static str) {
    match kind {
        AttachmentKind::Video => ("sendVideo", "video"),
        AttachmentKind::Photo => ("sendPhoto", "photo"),
        AttachmentKind::Audio => ("sendAudio", "audio"),
        AttachmentKind::Document => ("sendDocument", "document"),
    }
}

fn file_part(bytes: &[u8], file_name: &str, mime_type: Option<&str>) -> Part {
    let part = || Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
    mime_type
        .and_then(|mime| part().mime_str(mime).ok())
        .unwrap_or_else(part)
}

#[async_trait]
impl ResponderTransport for GatewayClient {
    async fn send_text(&self, conversation: &str, text: &str) -> Result<i64> {
        let chat_id = chat_ref(conversation);
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id: &chat_id,
                    text,
                    disable_web_page_preview: false,
                },
            )
            .await?;
        tracing::debug!(conversation, message_id = sent.message_id, "message sent");
        Ok(sent.message_id)
    }

    async fn list_recent_messages(
        &self,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let chat_id = chat_ref(conversation);
        let history: Vec<HistoryMessage> = self
            .call(
                "getChatHistory",
                &ChatHistoryRequest {
                    chat_id: &chat_id,
                    limit,
                },
            )
            .await?;
        Ok(history
            .into_iter()
            .map(HistoryMessage::into_conversation)
            .collect())
    }

    async fn click_button(&self, conversation: &str, token: &SelectionToken) -> Result<()> {
        let chat_id = chat_ref(conversation);
        let _: serde_json::Value = self
            .call(
                "getCallbackQueryAnswer",
                &CallbackQueryRequest {
                    chat_id: &chat_id,
                    message_id: token.message_id,
                    data: &token.data,
                },
            )
            .await?;
        Ok(())
    }

    async fn download_media(&self, conversation: &str, message_id: i64) -> Result<Vec<u8>> {
        self.message_file(&chat_ref(conversation), message_id).await
    }

    async fn resolve_conversation(&self, conversation: &str) -> Result<()> {
        let chat_id = chat_ref(conversation);
        let chat: GatewayChat = self
            .call("getChat", &GetChatRequest { chat_id: &chat_id })
            .await?;
        tracing::debug!(conversation, chat_id = chat.id, "conversation resolved");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("gateway client dropped");
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let client = build_client(self.request_timeout)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
        tracing::debug!("gateway client rebuilt");
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        match self.whoami().await {
            Ok((id, username)) => {
                tracing::debug!(id, username = ?username, "identity authorized");
                Ok(true)
            }
            Err(Error::SessionInvalid(reason)) => {
                tracing::warn!(reason = %reason, "identity not authorized");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ArchiveStore for GatewayClient {
    async fn upload_media(&self, item: UploadItem, caption: &str) -> Result<ArchiveReference> {
        let (method, field) = send_method(item.kind);
        let chat_id = self.storage_chat_id;

        let sent: SentMessage = match &item.payload {
            UploadPayload::Remote { file_id } => {
                let request = SendFileRequest {
                    chat_id,
                    field,
                    file_id,
                    caption,
                };
                self.call(method, &request.to_json()).await?
            }
            UploadPayload::Buffer {
                bytes,
                file_name,
                mime_type,
            } => {
                self.call_multipart(method, || {
                    Form::new()
                        .text("chat_id", chat_id.to_string())
                        .text("caption", caption.to_string())
                        .part(field, file_part(bytes, file_name, mime_type.as_deref()))
                })
                .await?
            }
        };

        Ok(ArchiveReference {
            archive_location_id: chat_id,
            message_id: sent.message_id,
        })
    }

    async fn upload_album(&self, items: Vec<UploadItem>, caption: &str) -> Result<ArchiveReference> {
        let chat_id = self.storage_chat_id;
        let expected = items.len();

        let media: Vec<InputMedia> = items
            .iter()
            .enumerate()
            .map(|(i, item)| InputMedia {
                media_type: send_method(item.kind).1,
                media: match &item.payload {
                    UploadPayload::Remote { file_id } => file_id.clone(),
                    UploadPayload::Buffer { .. } => format!("attach://file{i}"),
                },
                caption: (i == 0).then(|| caption.to_string()),
            })
            .collect();

        let has_buffers = items
            .iter()
            .any(|item| matches!(item.payload, UploadPayload::Buffer { .. }));

        let sent: Vec<SentMessage> = if has_buffers {
            let media_json = serde_json::to_string(&media)?;
            self.call_multipart("sendMediaGroup", || {
                let mut form = Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("media", media_json.clone());
                for (i, item) in items.iter().enumerate() {
                    if let UploadPayload::Buffer {
                        bytes,
                        file_name,
                        mime_type,
                    } = &item.payload
                    {
                        form = form.part(
                            format!("file{i}"),
                            file_part(bytes, file_name, mime_type.as_deref()),
                        );
                    }
                }
                form
            })
            .await?
        } else {
            self.call(
                "sendMediaGroup",
                &serde_json::json!({ "chat_id": chat_id, "media": media }),
            )
            .await?
        };

        if sent.len() != expected {
            return Err(Error::Archive(format!(
                "album partially archived: {} of {expected} items",
                sent.len()
            )));
        }

        // The album is addressed by its last message
        let last = sent
            .last()
            .ok_or_else(|| Error::Archive("empty album response".to_string()))?;
        Ok(ArchiveReference {
            archive_location_id: chat_id,
            message_id: last.message_id,
        })
    }

    async fn fetch_media(&self, reference: &ArchiveReference) -> Result<Vec<u8>> {
        self.message_file(
            &reference.archive_location_id.to_string(),
            reference.message_id,
        )
        .await
    }

    async fn verify(&self) -> Result<()> {
        let chat_id = self.storage_chat_id.to_string();
        let chat: GatewayChat = self
            .call("getChat", &GetChatRequest { chat_id: &chat_id })
            .await?;
        tracing::debug!(chat_id = chat.id, "archive location reachable");
        Ok(())
    }
}
