//! Error types for the media relay

use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the media relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// URL could not be parsed or belongs to no supported platform
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Format string not understood, or not offered by the platform
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Gateway request failed (transport, malformed reply, API error)
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Responder imposed a cooldown
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Wait required before the next request
        retry_after: Duration,
    },

    /// Shared identity lost its authorization (e.g. duplicated auth key)
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// A format token was used against a message that did not produce it
    #[error("offer token does not belong to message {0}")]
    ForeignToken(i64),

    /// Archive store rejected or partially applied an upload
    #[error("archive error: {0}")]
    Archive(String),

    /// Dispatcher worker is gone
    #[error("dispatcher stopped")]
    DispatcherStopped,

    /// A serialized job failed
    #[error("job failed: {0}")]
    Job(#[from] crate::dispatcher::FailureReason),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error means the shared identity needs recovery
    #[must_use]
    pub const fn is_session_fault(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }
}
