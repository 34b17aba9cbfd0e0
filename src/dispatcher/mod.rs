//! Serialized job queue in front of the shared identity
//!
//! Every responder interaction goes through one background worker, so at
//! most one job talks to the responders at any instant. Callers submit and
//! get a [`JobHandle`]; identical uncached requests share one job.

mod job;
mod pipeline;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::archive::ArchiveReference;
use crate::db::{CacheRepo, cache_key};
use crate::format::Format;
use crate::platform::{Platform, normalize_url};
use crate::responder::{FormatSupport, SessionState};
use crate::{Error, Result};

pub use job::{FailureReason, Job, JobHandle, JobResult, JobState, RunningJob};
pub use pipeline::{CheckItem, JobProcessor};

/// Requester recorded for format probes
const PROBE_REQUESTER: &str = "format-probe";

/// Externally visible queue state
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    /// Jobs waiting for the worker
    pub queued: usize,
    /// Job being processed
    pub running: Option<RunningJob>,
    /// Shared identity state
    pub session: SessionState,
}

enum Task {
    Retrieve {
        job: Job,
        state: watch::Sender<JobState>,
    },
    Probe {
        id: Uuid,
        platform: Platform,
        url: String,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Check {
        reply: oneshot::Sender<Vec<CheckItem>>,
    },
}

struct InFlight {
    id: Uuid,
    position: usize,
    state: watch::Receiver<JobState>,
}

#[derive(Default)]
struct QueueState {
    queued: usize,
    running: Option<RunningJob>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    fn ahead(&self) -> usize {
        self.queued + usize::from(self.running.is_some())
    }
}

type SharedQueue = Arc<Mutex<QueueState>>;

fn lock(queue: &SharedQueue) -> MutexGuard<'_, QueueState> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Job queue with a single worker
pub struct Dispatcher {
    processor: Arc<JobProcessor>,
    queue: SharedQueue,
    tx: mpsc::UnboundedSender<Task>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the worker
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(processor: JobProcessor) -> Self {
        let processor = Arc::new(processor);
        let queue = SharedQueue::default();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_worker(rx, processor.clone(), queue.clone()));

        Self {
            processor,
            queue,
            tx,
            worker,
        }
    }

    /// Submit a retrieval request
    ///
    /// Returns at once. Cached keys resolve without queueing; a key already
    /// in flight joins the existing job.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` for unsupported or mismatched URLs,
    /// `Error::UnsupportedFormat` when the platform offers no formats, and
    /// `Error::DispatcherStopped` if the worker is gone
    pub fn submit(
        &self,
        requester: &str,
        url: &str,
        platform: Option<Platform>,
        format: Option<Format>,
    ) -> Result<JobHandle> {
        let detected = Platform::detect(url)?;
        if let Some(platform) = platform.filter(|p| *p != detected) {
            return Err(Error::InvalidUrl(format!(
                "{url} is a {detected} url, not {platform}"
            )));
        }

        let format = self.resolve_format(detected, format)?;
        let url = normalize_url(url)?;
        let key = cache_key(&url, format.as_ref())?;

        match self.processor.cache().get_entry(&key) {
            Ok(Some(entry)) => {
                tracing::debug!(requester, key = %key, "cache hit");
                return Ok(JobHandle::cached(key, entry.reference));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "cache read failed, queueing"),
        }

        let mut queue = lock(&self.queue);

        if let Some(existing) = queue.in_flight.get(&key) {
            tracing::info!(requester, job_id = %existing.id, "joined job in flight");
            return Ok(JobHandle::new(
                existing.id,
                key,
                existing.position,
                true,
                existing.state.clone(),
            ));
        }

        let position = queue.ahead();
        let job = Job {
            id: Uuid::new_v4(),
            requester: requester.to_string(),
            url,
            platform: detected,
            format,
            key: key.clone(),
        };
        let id = job.id;
        let (state_tx, state_rx) = watch::channel(JobState::Queued);

        self.tx
            .send(Task::Retrieve {
                job,
                state: state_tx,
            })
            .map_err(|_| Error::DispatcherStopped)?;

        queue.queued += 1;
        queue.in_flight.insert(
            key.clone(),
            InFlight {
                id,
                position,
                state: state_rx.clone(),
            },
        );
        drop(queue);

        tracing::info!(requester, job_id = %id, platform = %detected, position, "job queued");
        Ok(JobHandle::new(id, key, position, false, state_rx))
    }

    /// Archived reference for a URL, without touching the network
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the database fails
    pub fn cache_lookup(&self, url: &str, format: Option<&Format>) -> Result<Option<ArchiveReference>> {
        let format = match Platform::detect(url)
            .ok()
            .and_then(|platform| self.processor.profile(platform))
        {
            Some(profile) => profile.effective_format(format),
            None => format.cloned(),
        };
        self.processor.cache().get(url, format.as_ref())
    }

    /// Labels of the option menu a responder presents for `url`
    ///
    /// Runs as a serialized job; no option is pressed.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedFormat` for platforms without menus,
    /// `Error::Job` when the responder does not present one, and
    /// `Error::DispatcherStopped` if the worker is gone
    pub async fn probe_formats(&self, url: &str) -> Result<Vec<String>> {
        let platform = Platform::detect(url)?;
        let supports_formats = self
            .processor
            .profile(platform)
            .is_some_and(|profile| profile.formats != FormatSupport::Unsupported);
        if !supports_formats {
            return Err(Error::UnsupportedFormat(format!(
                "{platform} does not offer formats"
            )));
        }

        let url = normalize_url(url)?;
        let (reply, response) = oneshot::channel();
        {
            let mut queue = lock(&self.queue);
            self.tx
                .send(Task::Probe {
                    id: Uuid::new_v4(),
                    platform,
                    url,
                    reply,
                })
                .map_err(|_| Error::DispatcherStopped)?;
            queue.queued += 1;
        }

        response.await.map_err(|_| Error::DispatcherStopped)?
    }

    /// Queue depth, running job and session state
    #[must_use]
    pub fn status(&self) -> DispatcherStatus {
        let queue = lock(&self.queue);
        DispatcherStatus {
            queued: queue.queued,
            running: queue.running.clone(),
            session: self.processor.identity().state(),
        }
    }

    /// Return an unusable session to active after an operator fixed it
    pub fn reset_session(&self) {
        self.processor.identity().reset();
    }

    /// Verify the identity, archive location and responders
    ///
    /// Queued behind earlier jobs so the checks never overlap a job's
    /// traffic on the shared identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::DispatcherStopped` if the worker is gone
    pub async fn check(&self) -> Result<Vec<CheckItem>> {
        let (reply, response) = oneshot::channel();
        {
            let mut queue = lock(&self.queue);
            self.tx
                .send(Task::Check { reply })
                .map_err(|_| Error::DispatcherStopped)?;
            queue.queued += 1;
        }

        response.await.map_err(|_| Error::DispatcherStopped)
    }

    /// Content cache
    #[must_use]
    pub fn cache(&self) -> &CacheRepo {
        self.processor.cache()
    }

    /// Stop accepting jobs and wait for the queue to drain
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "dispatcher worker ended abnormally");
        }
    }

    fn resolve_format(&self, platform: Platform, format: Option<Format>) -> Result<Option<Format>> {
        let profile = self
            .processor
            .profile(platform)
            .ok_or_else(|| Error::Config(format!("no responder configured for {platform}")))?;

        if let Some(format) = &format
            && profile.formats == FormatSupport::Unsupported
        {
            return Err(Error::UnsupportedFormat(format!(
                "{platform} does not offer {format}"
            )));
        }
        Ok(profile.effective_format(format.as_ref()))
    }
}

/// Worker loop: one task at a time, in arrival order
async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Task>,
    processor: Arc<JobProcessor>,
    queue: SharedQueue,
) {
    tracing::info!("dispatcher worker started");

    while let Some(task) = rx.recv().await {
        match task {
            Task::Retrieve { job, state } => {
                begin(&queue, RunningJob::from(&job));
                state.send_replace(JobState::Running);

                let started = Instant::now();
                let result = run_isolated(processor.clone(), job.clone()).await;
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                match &result {
                    Ok(reference) => {
                        tracing::info!(job_id = %job.id, %reference, elapsed_ms, "job succeeded");
                    }
                    Err(reason) => {
                        tracing::warn!(job_id = %job.id, reason = %reason, elapsed_ms, "job failed");
                    }
                }

                complete(&queue, &job, &state, result);
            }
            Task::Probe {
                id,
                platform,
                url,
                reply,
            } => {
                begin(
                    &queue,
                    RunningJob {
                        id,
                        requester: PROBE_REQUESTER.to_string(),
                        url: url.clone(),
                        platform,
                    },
                );

                let probe = processor.clone();
                let result = match tokio::spawn(async move { probe.probe(platform, &url).await }).await
                {
                    Ok(result) => result,
                    Err(e) => Err(Error::Job(FailureReason::Internal(join_failure(e)))),
                };
                if reply.send(result).is_err() {
                    tracing::debug!(job_id = %id, "probe caller went away");
                }
                lock(&queue).running = None;
            }
            Task::Check { reply } => {
                {
                    let mut queue = lock(&queue);
                    queue.queued = queue.queued.saturating_sub(1);
                }

                let check = processor.clone();
                let items = match tokio::spawn(async move { check.check().await }).await {
                    Ok(items) => items,
                    Err(e) => vec![CheckItem::failed("check", join_failure(e))],
                };
                if reply.send(items).is_err() {
                    tracing::debug!("check caller went away");
                }
            }
        }
    }

    tracing::info!("dispatcher worker stopped");
}

/// Run a job in its own task so a panic fails the job, not the worker
async fn run_isolated(processor: Arc<JobProcessor>, job: Job) -> JobResult {
    let job_id = job.id;
    match tokio::spawn(async move { processor.run(&job).await }).await {
        Ok(result) => result,
        Err(e) => {
            let detail = join_failure(e);
            tracing::error!(job_id = %job_id, detail = %detail, "job aborted");
            Err(FailureReason::Internal(detail))
        }
    }
}

fn join_failure(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {message}")
}

fn begin(queue: &SharedQueue, running: RunningJob) {
    let mut queue = lock(queue);
    queue.queued = queue.queued.saturating_sub(1);
    queue.running = Some(running);
}

/// Retire a retrieval and publish its outcome under one lock
///
/// Waiters woken by the terminal state never find the key still in flight.
fn complete(queue: &SharedQueue, job: &Job, state: &watch::Sender<JobState>, result: JobResult) {
    let mut queue = lock(queue);
    queue.running = None;
    if queue
        .in_flight
        .get(&job.key)
        .is_some_and(|entry| entry.id == job.id)
    {
        queue.in_flight.remove(&job.key);
    }
    state.send_replace(result.into());
}
