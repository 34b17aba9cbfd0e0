//! Jobs, their lifecycle states and the handles callers await

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::Error;
use crate::archive::ArchiveReference;
use crate::format::Format;
use crate::platform::Platform;

/// Why a job did not produce an archive reference
///
/// Cloneable so one outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// Nothing qualifying arrived before the timeout
    #[error("responder did not reply in time")]
    NoResponse,

    /// Responder said it could not retrieve the content
    #[error("responder refused: {0}")]
    NegativeResponse(String),

    /// No offered option fits the requested format
    #[error("no offered option matches {0}")]
    NoFormatMatch(String),

    /// Archiving failed; nothing was cached
    #[error("upload failed: {0}")]
    UploadFailure(String),

    /// Responder imposed a cooldown
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Wait before submitting again
        retry_after: Duration,
    },

    /// Shared identity is unusable
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// Gateway or network failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Fault inside the relay itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for FailureReason {
    fn from(error: Error) -> Self {
        match error {
            Error::RateLimited { retry_after } => Self::RateLimited { retry_after },
            Error::SessionInvalid(reason) => Self::SessionInvalid(reason),
            Error::Archive(reason) => Self::UploadFailure(reason),
            Error::Gateway(reason) => Self::Transport(reason),
            Error::Http(e) => Self::Transport(e.without_url().to_string()),
            Error::Io(e) => Self::Transport(e.to_string()),
            Error::Job(reason) => reason,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Terminal result of a job
pub type JobResult = std::result::Result<ArchiveReference, FailureReason>;

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for the worker
    Queued,
    /// Being processed
    Running,
    /// Archived
    Succeeded(ArchiveReference),
    /// Failed
    Failed(FailureReason),
}

impl JobState {
    /// Result, once the job is terminal
    #[must_use]
    pub fn result(&self) -> Option<JobResult> {
        match self {
            Self::Succeeded(reference) => Some(Ok(*reference)),
            Self::Failed(reason) => Some(Err(reason.clone())),
            Self::Queued | Self::Running => None,
        }
    }
}

impl From<JobResult> for JobState {
    fn from(result: JobResult) -> Self {
        match result {
            Ok(reference) => Self::Succeeded(reference),
            Err(reason) => Self::Failed(reason),
        }
    }
}

/// A retrieval request owned by the dispatcher
#[derive(Debug, Clone)]
pub struct Job {
    /// Job id
    pub id: Uuid,
    /// Who asked, for status reporting
    pub requester: String,
    /// Normalized content URL
    pub url: String,
    /// Responder platform
    pub platform: Platform,
    /// Format to negotiate, already resolved against the platform
    pub format: Option<Format>,
    /// Cache key the result is stored under
    pub key: String,
}

/// The job currently being processed, as reported by status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningJob {
    /// Job id
    pub id: Uuid,
    /// Who asked
    pub requester: String,
    /// Content URL
    pub url: String,
    /// Responder platform
    pub platform: Platform,
}

impl From<&Job> for RunningJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            requester: job.requester.clone(),
            url: job.url.clone(),
            platform: job.platform,
        }
    }
}

/// Caller's view of a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    key: String,
    queue_position: usize,
    from_cache: bool,
    coalesced: bool,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub(crate) const fn new(
        id: Uuid,
        key: String,
        queue_position: usize,
        coalesced: bool,
        state: watch::Receiver<JobState>,
    ) -> Self {
        Self {
            id,
            key,
            queue_position,
            from_cache: false,
            coalesced,
            state,
        }
    }

    /// Handle that is already resolved from the cache
    pub(crate) fn cached(key: String, reference: ArchiveReference) -> Self {
        let (_, state) = watch::channel(JobState::Succeeded(reference));
        Self {
            id: Uuid::new_v4(),
            key,
            queue_position: 0,
            from_cache: true,
            coalesced: false,
            state,
        }
    }

    /// Job id; coalesced handles share the id of the job they joined
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Cache key the job resolves
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Jobs ahead of this one at submission time
    #[must_use]
    pub const fn queue_position(&self) -> usize {
        self.queue_position
    }

    /// Resolved from the cache without touching the queue
    #[must_use]
    pub const fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Joined an identical job already in flight
    #[must_use]
    pub const fn coalesced(&self) -> bool {
        self.coalesced
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Wait for the job to finish
    ///
    /// Every path ends in a result; if the dispatcher goes away first the job
    /// fails as `Internal`.
    pub async fn await_result(mut self) -> JobResult {
        loop {
            if let Some(result) = self.state.borrow_and_update().result() {
                return result;
            }
            if self.state.changed().await.is_err() {
                return self.state.borrow().result().unwrap_or_else(|| {
                    Err(FailureReason::Internal("dispatcher stopped".to_string()))
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ArchiveReference {
        ArchiveReference {
            archive_location_id: -100,
            message_id: 7,
        }
    }

    #[test]
    fn errors_map_to_failure_reasons() {
        assert_eq!(
            FailureReason::from(Error::RateLimited {
                retry_after: Duration::from_secs(9)
            }),
            FailureReason::RateLimited {
                retry_after: Duration::from_secs(9)
            }
        );
        assert_eq!(
            FailureReason::from(Error::Archive("partial".into())),
            FailureReason::UploadFailure("partial".into())
        );
        assert!(matches!(
            FailureReason::from(Error::Gateway("down".into())),
            FailureReason::Transport(_)
        ));
        assert!(matches!(
            FailureReason::from(Error::Database("locked".into())),
            FailureReason::Internal(_)
        ));
    }

    #[tokio::test]
    async fn cached_handle_resolves_immediately() {
        let handle = JobHandle::cached("k".into(), reference());
        assert!(handle.from_cache());
        assert_eq!(handle.await_result().await, Ok(reference()));
    }

    #[tokio::test]
    async fn handle_follows_state_changes() {
        let (tx, rx) = watch::channel(JobState::Queued);
        let handle = JobHandle::new(Uuid::new_v4(), "k".into(), 2, false, rx);
        assert_eq!(handle.queue_position(), 2);

        let waiter = tokio::spawn(handle.await_result());
        tx.send_replace(JobState::Running);
        tx.send_replace(JobState::Failed(FailureReason::NoResponse));

        assert_eq!(waiter.await.unwrap(), Err(FailureReason::NoResponse));
    }

    #[tokio::test]
    async fn dropped_sender_fails_the_waiter() {
        let (tx, rx) = watch::channel(JobState::Queued);
        let handle = JobHandle::new(Uuid::new_v4(), "k".into(), 0, false, rx);
        drop(tx);
        assert!(matches!(
            handle.await_result().await,
            Err(FailureReason::Internal(_))
        ));
    }
}
