//! Media Relay - retrieves media through third-party responder bots
//!
//! One logged-in user identity talks to a responder bot per platform: it
//! sends a content URL, walks the bot's option menu when needed, waits for
//! the media reply and copies it into an archive chat. Results are cached so
//! a URL is only ever fetched once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   submit(url) ──► Cache ──hit──► ArchiveReference    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ miss
//! ┌────────────────────▼────────────────────────────────┐
//! │        Dispatcher (single worker, FIFO)              │
//! │  send ─► negotiate format ─► poll ─► archive ─► put  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        Session gateway (shared user identity)        │
//! │   responder conversations  │  archive chat           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod archive;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod gateway;
pub mod platform;
pub mod responder;

pub use archive::{ArchiveReference, ArchiveStore, StorageUploader};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use db::{CacheRepo, DbPool};
pub use dispatcher::{Dispatcher, FailureReason, JobHandle, JobProcessor};
pub use error::{Error, Result};
pub use format::Format;
pub use gateway::GatewayClient;
pub use platform::Platform;
pub use responder::{ExternalBotSession, ResponderProfile, ResponderTransport, SharedIdentity};
