//! One job, start to finish: send, negotiate, poll, archive, cache

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::job::{FailureReason, Job, JobResult};
use crate::archive::{ArchiveReference, StorageUploader};
use crate::db::{CacheRepo, PutOutcome};
use crate::format::{self, Format};
use crate::platform::Platform;
use crate::responder::{
    ExternalBotSession, FormatSupport, OfferOutcome, PollOutcome, ResponderProfile,
    SharedIdentity,
};
use crate::{Error, Result};

/// Outcome of one connectivity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    /// What was checked
    pub name: String,
    /// Failure description, if any
    pub error: Option<String>,
}

impl CheckItem {
    fn from_result(name: impl Into<String>, result: Result<()>) -> Self {
        Self {
            name: name.into(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    pub(crate) fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
        }
    }

    /// Whether the check passed
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a job needs: responder sessions, archive and cache
pub struct JobProcessor {
    identity: Arc<SharedIdentity>,
    sessions: HashMap<Platform, ExternalBotSession>,
    uploader: StorageUploader,
    cache: CacheRepo,
}

impl JobProcessor {
    /// Create a processor with one responder session per profile
    #[must_use]
    pub fn new(
        identity: Arc<SharedIdentity>,
        profiles: impl IntoIterator<Item = ResponderProfile>,
        uploader: StorageUploader,
        cache: CacheRepo,
    ) -> Self {
        let sessions = profiles
            .into_iter()
            .map(|profile| {
                (
                    profile.platform,
                    ExternalBotSession::new(identity.clone(), profile),
                )
            })
            .collect();
        Self {
            identity,
            sessions,
            uploader,
            cache,
        }
    }

    /// Shared identity behind every session
    #[must_use]
    pub const fn identity(&self) -> &Arc<SharedIdentity> {
        &self.identity
    }

    /// Content cache
    #[must_use]
    pub const fn cache(&self) -> &CacheRepo {
        &self.cache
    }

    /// Responder profile for a platform
    #[must_use]
    pub fn profile(&self, platform: Platform) -> Option<&ResponderProfile> {
        self.sessions.get(&platform).map(ExternalBotSession::profile)
    }

    fn session(&self, platform: Platform) -> Result<&ExternalBotSession> {
        self.sessions
            .get(&platform)
            .ok_or_else(|| Error::Config(format!("no responder configured for {platform}")))
    }

    /// Process a retrieval job
    ///
    /// Fails immediately when the identity is unusable and short-circuits
    /// when another job already cached the key.
    pub async fn run(&self, job: &Job) -> JobResult {
        self.identity.ensure_usable()?;

        match self.cache.get_entry(&job.key) {
            Ok(Some(entry)) => {
                tracing::debug!(job_id = %job.id, key = %job.key, "cached while queued");
                return Ok(entry.reference);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "cache read failed, continuing"),
        }

        let session = self.session(job.platform)?;
        Ok(self.with_recovery(|| self.retrieve(session, job)).await?)
    }

    /// Send `url` and return the labels of the option menu
    ///
    /// # Errors
    ///
    /// Returns `Error::Job` when no menu arrives or the responder refuses,
    /// otherwise transport and session errors
    pub async fn probe(&self, platform: Platform, url: &str) -> Result<Vec<String>> {
        self.identity.ensure_usable()?;
        let session = self.session(platform)?;

        self.with_recovery(|| probe_once(session, url)).await
    }

    /// Verify the identity, the archive location and every responder
    pub async fn check(&self) -> Vec<CheckItem> {
        let mut items = Vec::with_capacity(self.sessions.len() + 2);

        let authorized = match self.identity.transport().is_authorized().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::SessionInvalid("identity not authorized".to_string())),
            Err(e) => Err(e),
        };
        items.push(CheckItem::from_result("identity", authorized));
        items.push(CheckItem::from_result(
            "archive",
            self.uploader.store().verify().await,
        ));

        let mut platforms: Vec<_> = self.sessions.keys().copied().collect();
        platforms.sort();
        for platform in platforms {
            if let Some(session) = self.sessions.get(&platform) {
                items.push(CheckItem::from_result(
                    format!("{platform} (@{})", session.profile().username),
                    session.verify().await,
                ));
            }
        }
        items
    }

    /// Run `op`, recovering the identity once per fault
    ///
    /// A fault during the retry after a recovery leaves the identity
    /// unusable, since [`SharedIdentity::recover`] refuses a second
    /// consecutive reconnect.
    async fn with_recovery<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match op().await {
                Err(e) if e.is_session_fault() => {
                    tracing::warn!(error = %e, "identity fault during interaction");
                    self.identity.recover().await?;
                }
                outcome => {
                    self.identity.note_success();
                    return outcome;
                }
            }
        }
    }

    async fn retrieve(&self, session: &ExternalBotSession, job: &Job) -> Result<ArchiveReference> {
        let profile = session.profile();
        let attempts = profile.attempts.max(1);

        for attempt in 1..=attempts {
            let mut watermark = session.send(&job.url).await?;

            if let Some(format) = &job.format {
                watermark = negotiate(session, watermark, format).await?;
            }

            match session.await_media(watermark).await? {
                PollOutcome::Media(media) => {
                    tracing::info!(
                        job_id = %job.id,
                        platform = %job.platform,
                        items = media.len(),
                        "media received"
                    );
                    let reference = self
                        .uploader
                        .upload(&media, profile.delivery, profile.caption, session)
                        .await?;
                    return Ok(self.record(job, reference));
                }
                PollOutcome::Negative(text) => {
                    return Err(FailureReason::NegativeResponse(text).into());
                }
                PollOutcome::NoResponse if attempt < attempts => {
                    tracing::info!(
                        job_id = %job.id,
                        attempt,
                        delay_ms = u64::try_from(profile.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "no reply, resending"
                    );
                    self.identity.clock().sleep(profile.retry_delay).await;
                }
                PollOutcome::NoResponse => {}
            }
        }

        Err(FailureReason::NoResponse.into())
    }

    /// Cache an archived result; an earlier writer's reference wins
    fn record(&self, job: &Job, reference: ArchiveReference) -> ArchiveReference {
        match self
            .cache
            .put(&job.url, job.format.as_ref(), reference, job.platform)
        {
            Ok(PutOutcome::Inserted) => reference,
            Ok(PutOutcome::AlreadyExists(existing)) => {
                tracing::info!(job_id = %job.id, %existing, "key cached by an earlier job");
                existing
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, %reference, error = %e, "archived but not cached");
                reference
            }
        }
    }
}

async fn probe_once(session: &ExternalBotSession, url: &str) -> Result<Vec<String>> {
    let watermark = session.send(url).await?;
    match session.await_offers(watermark).await? {
        OfferOutcome::Offers(message) => Ok(message
            .offers
            .into_iter()
            .map(|offer| offer.label)
            .collect()),
        OfferOutcome::Negative(text) => Err(FailureReason::NegativeResponse(text).into()),
        OfferOutcome::NoResponse => Err(FailureReason::NoResponse.into()),
    }
}

/// Walk the option menu, returning the watermark media must exceed
async fn negotiate(
    session: &ExternalBotSession,
    watermark: i64,
    desired: &Format,
) -> Result<i64> {
    match session.await_offers(watermark).await? {
        OfferOutcome::Offers(message) => {
            let token = format::select(&message.offers, desired)
                .ok_or_else(|| FailureReason::NoFormatMatch(desired.to_string()))?;
            session.click(&message, &token).await?;
            Ok(message.message_id)
        }
        OfferOutcome::Negative(text) => Err(FailureReason::NegativeResponse(text).into()),
        OfferOutcome::NoResponse
            if session.profile().formats == FormatSupport::Optional =>
        {
            tracing::debug!(format = %desired, "no option menu, polling for media");
            Ok(watermark)
        }
        OfferOutcome::NoResponse => Err(FailureReason::NoResponse.into()),
    }
}
