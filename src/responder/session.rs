//! The shared identity and its per-responder conversations

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::poller::{OfferMessage, OfferOutcome, PollOutcome, ResponsePoller};
use super::profile::ResponderProfile;
use super::transport::ResponderTransport;
use crate::clock::Clock;
use crate::format::SelectionToken;
use crate::{Error, Result};

/// Priming message sent before each request
const PRIME_COMMAND: &str = "/start";

/// Recovery state of the shared identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Usable
    Active,
    /// Reconnecting after an identity-conflict fault
    Recovering,
    /// Recovery failed or faulted twice; needs an operator reset
    Unusable,
}

#[derive(Debug)]
struct Recovery {
    state: SessionState,
    /// A fault was recovered and no successful interaction has happened since
    fault_pending: bool,
}

/// Authenticated identity shared by every responder conversation
pub struct SharedIdentity {
    transport: Arc<dyn ResponderTransport>,
    clock: Arc<dyn Clock>,
    reconnect_pause: Duration,
    recovery: Mutex<Recovery>,
}

impl SharedIdentity {
    /// Create an identity in the `Active` state
    #[must_use]
    pub fn new(
        transport: Arc<dyn ResponderTransport>,
        clock: Arc<dyn Clock>,
        reconnect_pause: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            reconnect_pause,
            recovery: Mutex::new(Recovery {
                state: SessionState::Active,
                fault_pending: false,
            }),
        }
    }

    /// Transport the identity speaks through
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ResponderTransport> {
        &self.transport
    }

    /// Clock used for pauses
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current recovery state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Fail fast when the identity is unusable
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionInvalid` if the identity is `Unusable`
    pub fn ensure_usable(&self) -> Result<()> {
        match self.lock().state {
            SessionState::Unusable => Err(Error::SessionInvalid(
                "session unusable until reset".to_string(),
            )),
            SessionState::Active | SessionState::Recovering => Ok(()),
        }
    }

    /// Record an interaction that completed without an identity fault
    pub fn note_success(&self) {
        let mut recovery = self.lock();
        if recovery.fault_pending {
            tracing::debug!("identity healthy again after recovery");
        }
        recovery.fault_pending = false;
    }

    /// Recover from an identity-conflict fault
    ///
    /// Reconnects at most once per fault: disconnect, pause, connect and
    /// re-verify authorization. A fault that follows a recovery with no
    /// successful interaction in between is not retried.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionInvalid` and leaves the identity `Unusable` if
    /// recovery is refused or fails
    pub async fn recover(&self) -> Result<()> {
        {
            let mut recovery = self.lock();
            match recovery.state {
                SessionState::Unusable => {
                    return Err(Error::SessionInvalid(
                        "session unusable until reset".to_string(),
                    ));
                }
                _ if recovery.fault_pending => {
                    recovery.state = SessionState::Unusable;
                    tracing::error!("second consecutive identity fault, session unusable");
                    return Err(Error::SessionInvalid(
                        "repeated identity fault".to_string(),
                    ));
                }
                _ => {
                    recovery.state = SessionState::Recovering;
                    recovery.fault_pending = true;
                }
            }
        }

        tracing::warn!(
            pause_ms = u64::try_from(self.reconnect_pause.as_millis()).unwrap_or(u64::MAX),
            "identity fault, reconnecting"
        );
        let outcome = self.reconnect().await;

        let mut recovery = self.lock();
        match outcome {
            Ok(true) => {
                recovery.state = SessionState::Active;
                tracing::info!("identity recovered");
                Ok(())
            }
            Ok(false) => {
                recovery.state = SessionState::Unusable;
                tracing::error!("identity not authorized after reconnect");
                Err(Error::SessionInvalid(
                    "not authorized after reconnect".to_string(),
                ))
            }
            Err(e) => {
                recovery.state = SessionState::Unusable;
                tracing::error!(error = %e, "reconnect failed");
                Err(Error::SessionInvalid(format!("reconnect failed: {e}")))
            }
        }
    }

    /// Return to `Active` after an operator intervened
    pub fn reset(&self) {
        let mut recovery = self.lock();
        recovery.state = SessionState::Active;
        recovery.fault_pending = false;
        tracing::info!("session reset");
    }

    async fn reconnect(&self) -> Result<bool> {
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed, continuing");
        }
        self.clock.sleep(self.reconnect_pause).await;
        self.transport.connect().await?;
        self.transport.is_authorized().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recovery> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Conversation between the shared identity and one responder
pub struct ExternalBotSession {
    identity: Arc<SharedIdentity>,
    profile: ResponderProfile,
    poller: ResponsePoller,
}

impl ExternalBotSession {
    /// Create a session for `profile` on top of `identity`
    #[must_use]
    pub fn new(identity: Arc<SharedIdentity>, profile: ResponderProfile) -> Self {
        let poller = ResponsePoller::new(identity.transport().clone(), identity.clock().clone());
        Self {
            identity,
            profile,
            poller,
        }
    }

    /// Protocol parameters
    #[must_use]
    pub const fn profile(&self) -> &ResponderProfile {
        &self.profile
    }

    /// Shared identity
    #[must_use]
    pub const fn identity(&self) -> &Arc<SharedIdentity> {
        &self.identity
    }

    fn conversation(&self) -> &str {
        &self.profile.username
    }

    /// Send a content URL, returning the watermark
    ///
    /// Replies at or below the watermark belong to earlier exchanges.
    ///
    /// # Errors
    ///
    /// Returns transport errors, `Error::RateLimited` or `Error::SessionInvalid`
    pub async fn send(&self, url: &str) -> Result<i64> {
        self.identity.ensure_usable()?;
        let transport = self.identity.transport();

        if self.profile.prime {
            transport.send_text(self.conversation(), PRIME_COMMAND).await?;
            self.identity.clock().sleep(self.profile.prime_pause).await;
        }

        let watermark = transport.send_text(self.conversation(), url).await?;
        tracing::debug!(
            conversation = self.conversation(),
            platform = %self.profile.platform,
            watermark,
            "request sent"
        );
        Ok(watermark)
    }

    /// Wait for the option menu that answers the request at `watermark`
    ///
    /// # Errors
    ///
    /// See [`ResponsePoller::wait_for_offers`]
    pub async fn await_offers(&self, watermark: i64) -> Result<OfferOutcome> {
        self.poller
            .wait_for_offers(self.conversation(), watermark, &self.profile.offer_poll())
            .await
    }

    /// Activate one option of `offer`
    ///
    /// # Errors
    ///
    /// Returns `Error::ForeignToken` if `token` was not produced by `offer`,
    /// otherwise transport errors
    pub async fn click(&self, offer: &OfferMessage, token: &SelectionToken) -> Result<()> {
        if token.message_id != offer.message_id {
            return Err(Error::ForeignToken(token.message_id));
        }
        self.identity.ensure_usable()?;
        self.identity
            .transport()
            .click_button(self.conversation(), token)
            .await?;
        tracing::debug!(
            conversation = self.conversation(),
            message_id = token.message_id,
            "option selected"
        );
        Ok(())
    }

    /// Wait for media answering the request at `watermark`
    ///
    /// # Errors
    ///
    /// See [`ResponsePoller::wait`]
    pub async fn await_media(&self, watermark: i64) -> Result<PollOutcome> {
        self.poller
            .wait(self.conversation(), watermark, &self.profile.poll)
            .await
    }

    /// Download the file attached to a responder message
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub async fn download_attachment(&self, message_id: i64) -> Result<Vec<u8>> {
        self.identity
            .transport()
            .download_media(self.conversation(), message_id)
            .await
    }

    /// Check the responder conversation resolves
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub async fn verify(&self) -> Result<()> {
        self.identity
            .transport()
            .resolve_conversation(self.conversation())
            .await
    }
}
