//! Per-platform responder protocol parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::poller::{Acceptance, PollConfig, PollMode};
use crate::archive::CaptionPolicy;
use crate::format::Format;
use crate::platform::Platform;

/// Pause between reads while waiting for an option menu
const OFFER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How a multi-message reply is archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Archive the single best item
    Single,
    /// Archive every item as one album when there is more than one
    Album,
    /// Archive the newest video or audio, falling back to the newest item
    PreferVideo,
}

/// Whether the responder negotiates formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatSupport {
    /// No option menu; formats are rejected
    Unsupported,
    /// Menu appears only sometimes; negotiated only when a format is given
    Optional,
    /// Menu always appears; `default` is used when no format is given
    Required {
        /// Format chosen for callers that did not ask for one
        default: Format,
    },
}

/// Protocol parameters for one responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderProfile {
    /// Platform this responder handles
    pub platform: Platform,
    /// Conversation handle (responder username)
    pub username: String,
    /// Send `/start` before each request
    pub prime: bool,
    /// Pause after priming
    pub prime_pause: Duration,
    /// Media polling parameters
    pub poll: PollConfig,
    /// Wait for the option menu
    pub offer_timeout: Duration,
    /// Interaction attempts when nothing arrives
    pub attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Archiving shape
    pub delivery: Delivery,
    /// Caption rewriting
    pub caption: CaptionPolicy,
    /// Format negotiation
    pub formats: FormatSupport,
}

impl ResponderProfile {
    /// Defaults for a platform's well-known responder
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        let base = Self {
            platform,
            username: String::new(),
            prime: true,
            prime_pause: Duration::from_secs(2),
            poll: PollConfig::default(),
            offer_timeout: Duration::from_secs(60),
            attempts: 1,
            retry_delay: Duration::from_secs(10),
            delivery: Delivery::Single,
            caption: CaptionPolicy::Fixed,
            formats: FormatSupport::Unsupported,
        };

        match platform {
            Platform::Instagram => Self {
                username: "KeepMediaBot".to_string(),
                poll: PollConfig {
                    timeout: Duration::from_secs(10),
                    mode: PollMode::All,
                    ..PollConfig::default()
                },
                attempts: 2,
                delivery: Delivery::Album,
                ..base
            },
            Platform::TikTok => Self {
                username: "KeepMediaBot".to_string(),
                ..base
            },
            Platform::YouTube => Self {
                username: "SaveYoutubeBot".to_string(),
                poll: PollConfig {
                    timeout: Duration::from_secs(30),
                    accept: Acceptance::VideoOrAudio,
                    ..PollConfig::default()
                },
                formats: FormatSupport::Required {
                    default: Format::DEFAULT_VIDEO,
                },
                ..base
            },
            Platform::Facebook => Self {
                username: "FacebookAsBot".to_string(),
                poll: PollConfig {
                    mode: PollMode::All,
                    ..PollConfig::default()
                },
                delivery: Delivery::PreferVideo,
                ..base
            },
            Platform::Twitter => Self {
                username: "twittervid_bot".to_string(),
                // Takes the URL directly, no `/start`
                prime: false,
                poll: PollConfig {
                    interval: Duration::from_secs(5),
                    limit: 20,
                    mode: PollMode::All,
                    ..PollConfig::default()
                },
                delivery: Delivery::PreferVideo,
                caption: CaptionPolicy::RewriteProvenance,
                formats: FormatSupport::Optional,
                ..base
            },
        }
    }

    /// Format to negotiate for a request, if any
    ///
    /// `None` means go straight to media polling.
    #[must_use]
    pub fn effective_format(&self, requested: Option<&Format>) -> Option<Format> {
        match (&self.formats, requested) {
            (FormatSupport::Unsupported, _) | (FormatSupport::Optional, None) => None,
            (_, Some(format)) => Some(format.clone()),
            (FormatSupport::Required { default }, None) => Some(default.clone()),
        }
    }

    /// Poll parameters for the option menu
    #[must_use]
    pub fn offer_poll(&self) -> PollConfig {
        PollConfig {
            timeout: self.offer_timeout,
            interval: OFFER_POLL_INTERVAL,
            ..self.poll
        }
    }
}
