//! Outbound surface of the shared identity

use async_trait::async_trait;

use super::message::ConversationMessage;
use crate::Result;
use crate::format::SelectionToken;

/// Conversation operations performed as the shared identity
///
/// A conversation is addressed by the responder's username. Implementations
/// map protocol failures onto `Error::RateLimited` and
/// `Error::SessionInvalid` so callers can react to them.
#[async_trait]
pub trait ResponderTransport: Send + Sync {
    /// Send a text message, returning its id
    async fn send_text(&self, conversation: &str, text: &str) -> Result<i64>;

    /// Most recent `limit` messages, newest first
    async fn list_recent_messages(
        &self,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>>;

    /// Press the button identified by `token` on the message that carries it
    async fn click_button(&self, conversation: &str, token: &SelectionToken) -> Result<()>;

    /// Download the file attached to a message
    async fn download_media(&self, conversation: &str, message_id: i64) -> Result<Vec<u8>>;

    /// Check that the conversation exists and is reachable
    async fn resolve_conversation(&self, conversation: &str) -> Result<()>;

    /// Drop the connection
    async fn disconnect(&self) -> Result<()>;

    /// Re-establish the connection
    async fn connect(&self) -> Result<()>;

    /// Whether the identity is still authorized
    async fn is_authorized(&self) -> Result<bool>;
}
