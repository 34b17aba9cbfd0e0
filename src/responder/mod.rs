//! Conversations with third-party responder bots
//!
//! The shared identity sends a content URL to a responder, optionally walks
//! its option menu, and polls the conversation until media or a refusal
//! arrives.

pub mod message;
pub mod poller;
pub mod profile;
pub mod session;
pub mod transport;

pub use message::{
    Attachment, AttachmentKind, ConversationMessage, MediaItem, MediaKind, MediaSet,
};
pub use poller::{
    Acceptance, OfferMessage, OfferOutcome, PollConfig, PollMode, PollOutcome, ResponsePoller,
};
pub use profile::{Delivery, FormatSupport, ResponderProfile};
pub use session::{ExternalBotSession, SessionState, SharedIdentity};
pub use transport::ResponderTransport;
