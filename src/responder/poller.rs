//! Watch a conversation for the responder's reply

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::message::{ConversationMessage, MediaItem, MediaKind, MediaSet};
use super::transport::ResponderTransport;
use crate::clock::Clock;
use crate::format::FormatOffer;
use crate::{Error, Result};

/// How many qualifying messages a reply is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Stop at the first poll that shows qualifying media and keep the best one
    Latest,
    /// Keep every qualifying message; stop once a poll adds nothing new
    All,
}

/// Which media kinds qualify as an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// Any transferable file
    AnyMedia,
    /// Only video and audio; stills are thumbnails
    VideoOrAudio,
}

impl Acceptance {
    const fn accepts(self, kind: MediaKind) -> bool {
        match self {
            Self::AnyMedia => kind.is_media(),
            Self::VideoOrAudio => kind.is_primary(),
        }
    }
}

/// Polling parameters for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Pause between history reads
    pub interval: Duration,
    /// Messages fetched per read
    pub limit: usize,
    /// Latest or all
    pub mode: PollMode,
    /// Qualifying kinds
    pub accept: Acceptance,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(3),
            limit: 10,
            mode: PollMode::Latest,
            accept: Acceptance::AnyMedia,
        }
    }
}

/// Result of waiting for media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Qualifying media arrived
    Media(MediaSet),
    /// The responder explicitly refused
    Negative(String),
    /// Nothing qualifying before the timeout
    NoResponse,
}

/// Message presenting selectable options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferMessage {
    /// Message id the offers are scoped to
    pub message_id: i64,
    /// Accompanying text
    pub text: Option<String>,
    /// Options in button order
    pub offers: Vec<FormatOffer>,
}

/// Result of waiting for an option menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// A message with data buttons arrived
    Offers(OfferMessage),
    /// The responder explicitly refused
    Negative(String),
    /// No option menu before the timeout
    NoResponse,
}

/// Polls a responder conversation through the transport
pub struct ResponsePoller {
    transport: Arc<dyn ResponderTransport>,
    clock: Arc<dyn Clock>,
}

impl ResponsePoller {
    /// Create a poller
    #[must_use]
    pub fn new(transport: Arc<dyn ResponderTransport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Wait for qualifying media newer than `watermark`
    ///
    /// A timeout is reported as `PollOutcome::NoResponse`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimited` or `Error::SessionInvalid` as soon as the
    /// transport reports them; other read failures are logged and retried on
    /// the next tick
    pub async fn wait(
        &self,
        conversation: &str,
        watermark: i64,
        config: &PollConfig,
    ) -> Result<PollOutcome> {
        let mut collected: Option<Vec<MediaItem>> = None;

        let outcome = self
            .poll_until(conversation, watermark, config, |fresh| {
                if let Some(text) = fresh.iter().find_map(ConversationMessage::failure_text) {
                    return Some(PollOutcome::Negative(text.to_string()));
                }

                let qualifying: Vec<MediaItem> = fresh
                    .iter()
                    .filter(|m| config.accept.accepts(m.classify()))
                    .filter_map(MediaItem::from_message)
                    .collect();
                if qualifying.is_empty() {
                    return None;
                }

                match config.mode {
                    PollMode::Latest => {
                        let set = MediaSet::new(qualifying);
                        let best = set.preferred().cloned()?;
                        Some(PollOutcome::Media(MediaSet::new(vec![best])))
                    }
                    PollMode::All => {
                        let settled = collected.as_ref().is_some_and(|prev| {
                            prev.len() == qualifying.len()
                                && prev
                                    .iter()
                                    .zip(&qualifying)
                                    .all(|(a, b)| a.message_id == b.message_id)
                        });
                        if settled {
                            return Some(PollOutcome::Media(MediaSet::new(qualifying)));
                        }
                        collected = Some(qualifying);
                        None
                    }
                }
            })
            .await?;

        Ok(match outcome {
            Some(outcome) => outcome,
            // Media that never settled before the deadline is still an answer
            None => collected.map_or(PollOutcome::NoResponse, |items| {
                PollOutcome::Media(MediaSet::new(items))
            }),
        })
    }

    /// Wait for a message newer than `watermark` that carries data buttons
    ///
    /// # Errors
    ///
    /// Same as [`ResponsePoller::wait`]
    pub async fn wait_for_offers(
        &self,
        conversation: &str,
        watermark: i64,
        config: &PollConfig,
    ) -> Result<OfferOutcome> {
        let outcome = self
            .poll_until(conversation, watermark, config, |fresh| {
                if let Some(text) = fresh.iter().find_map(ConversationMessage::failure_text) {
                    return Some(OfferOutcome::Negative(text.to_string()));
                }
                fresh
                    .iter()
                    .rev()
                    .find(|m| !m.buttons.is_empty())
                    .map(|m| {
                        OfferOutcome::Offers(OfferMessage {
                            message_id: m.id,
                            text: m.text.clone(),
                            offers: m.buttons.clone(),
                        })
                    })
            })
            .await?;

        Ok(outcome.unwrap_or(OfferOutcome::NoResponse))
    }

    /// Read history until `inspect` yields a value or the timeout passes
    ///
    /// `inspect` sees incoming messages newer than the watermark, oldest first.
    async fn poll_until<T, F>(
        &self,
        conversation: &str,
        watermark: i64,
        config: &PollConfig,
        mut inspect: F,
    ) -> Result<Option<T>>
    where
        F: FnMut(&[ConversationMessage]) -> Option<T> + Send,
        T: Send,
    {
        let deadline = self.clock.now() + config.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self
                .transport
                .list_recent_messages(conversation, config.limit)
                .await
            {
                Ok(messages) => {
                    let mut fresh: Vec<ConversationMessage> = messages
                        .into_iter()
                        .filter(|m| m.id > watermark && !m.outgoing)
                        .collect();
                    fresh.sort_by_key(|m| m.id);

                    if let Some(found) = inspect(&fresh) {
                        tracing::debug!(conversation, watermark, polls, "reply received");
                        return Ok(Some(found));
                    }
                }
                Err(e @ (Error::RateLimited { .. } | Error::SessionInvalid(_))) => return Err(e),
                Err(e) => {
                    tracing::warn!(conversation, error = %e, "history read failed, will retry");
                }
            }

            let now = self.clock.now();
            if now >= deadline {
                tracing::debug!(conversation, watermark, polls, "no reply before timeout");
                return Ok(None);
            }
            self.clock
                .sleep(config.interval.min(deadline - now))
                .await;
        }
    }
}
