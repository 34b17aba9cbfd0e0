//! Shared test utilities
//!
//! A scripted responder bot, a recording archive store and a virtual clock,
//! wired into a running dispatcher the same way the binary wires the gateway.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use media_relay::archive::{ArchiveStore, UploadItem, UploadPayload};
use media_relay::format::{FormatOffer, SelectionToken};
use media_relay::responder::{Attachment, AttachmentKind, ConversationMessage};
use media_relay::{
    ArchiveReference, CacheRepo, Clock, DbPool, Dispatcher, Error, JobProcessor,
    ResponderProfile, ResponderTransport, Result, SharedIdentity, StorageUploader, db,
    platform::Platform,
};

/// Archive location used by the fake store
pub const ARCHIVE_CHAT: i64 = -100_777;

/// Attribution line configured in tests
pub const ATTRIBUTION: &str = "via test relay";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock whose sleeps advance virtual time instantly
pub struct StepClock {
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl StepClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Virtual time slept so far
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }
}

#[async_trait]
impl Clock for StepClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
        tokio::task::yield_now().await;
    }
}

/// How the fake responder answers a URL
#[derive(Debug, Clone)]
pub enum Reply {
    /// One message per attachment, grouped when more than one
    Media {
        kinds: Vec<AttachmentKind>,
        caption: Option<String>,
    },
    /// A refusal
    Negative(String),
    /// Nothing at all
    Silent,
    /// An option menu; pressing any option yields a video
    Offers(Vec<(&'static str, &'static str)>),
    /// A link preview followed by a thumbnail and the video
    PreviewThenVideo,
    /// The fake panics while handling the request
    Panic,
}

impl Reply {
    #[must_use]
    pub fn video() -> Self {
        Self::Media {
            kinds: vec![AttachmentKind::Video],
            caption: None,
        }
    }
}

#[derive(Default)]
struct Conversation {
    messages: Vec<ConversationMessage>,
}

#[derive(Default)]
struct ResponderState {
    next_id: i64,
    conversations: HashMap<String, Conversation>,
    replies: HashMap<String, Reply>,
    /// Upcoming `send_text` calls that fail with an identity fault
    session_faults: u32,
    /// Cooldown imposed on the next request
    cooldown: Option<Duration>,
    authorized: bool,
    connected: bool,
    calls: u32,
    sent_urls: Vec<String>,
    url_attempts: u32,
    primes: u32,
    clicked: Vec<String>,
    reconnects: u32,
}

/// Scripted responder bots behind one identity
pub struct FakeResponder {
    state: Mutex<ResponderState>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeResponder {
    #[must_use]
    pub fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            state: Mutex::new(ResponderState {
                next_id: 100,
                authorized: true,
                connected: true,
                ..ResponderState::default()
            }),
            events,
        }
    }

    /// Script the reply for a (normalized) URL; unscripted URLs get a video
    pub fn script(&self, url: &str, reply: Reply) {
        lock(&self.state).replies.insert(url.to_string(), reply);
    }

    /// Make the next `count` sends fail with an identity fault
    pub fn fail_sessions(&self, count: u32) {
        lock(&self.state).session_faults = count;
    }

    /// Make the next request fail with a cooldown of `retry_after`
    pub fn rate_limit(&self, retry_after: Duration) {
        lock(&self.state).cooldown = Some(retry_after);
    }

    /// Whether reconnecting restores authorization
    pub fn set_authorized(&self, authorized: bool) {
        lock(&self.state).authorized = authorized;
    }

    /// Every transport call made so far
    pub fn calls(&self) -> u32 {
        lock(&self.state).calls
    }

    /// URLs sent, in order (priming excluded)
    pub fn sent_urls(&self) -> Vec<String> {
        lock(&self.state).sent_urls.clone()
    }

    /// Requests attempted, failed ones included (priming excluded)
    pub fn url_attempts(&self) -> u32 {
        lock(&self.state).url_attempts
    }

    /// `/start` messages sent
    pub fn primes(&self) -> u32 {
        lock(&self.state).primes
    }

    /// Option data pressed, in order
    pub fn clicked(&self) -> Vec<String> {
        lock(&self.state).clicked.clone()
    }

    /// Completed reconnects
    pub fn reconnects(&self) -> u32 {
        lock(&self.state).reconnects
    }

    fn record(&self, event: String) {
        lock(&self.events).push(event);
    }
}

impl ResponderState {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push(&mut self, conversation: &str, message: ConversationMessage) {
        self.conversations
            .entry(conversation.to_string())
            .or_default()
            .messages
            .push(message);
    }

    fn push_attachment(
        &mut self,
        conversation: &str,
        kind: AttachmentKind,
        caption: Option<String>,
        group: Option<String>,
    ) {
        let id = self.next();
        self.push(
            conversation,
            ConversationMessage {
                id,
                text: caption,
                attachment: Some(Attachment {
                    kind,
                    file_id: Some(format!("file-{id}")),
                    mime_type: None,
                    file_name: None,
                }),
                media_group_id: group,
                ..ConversationMessage::default()
            },
        );
    }

    fn answer(&mut self, conversation: &str, reply: Reply) {
        match reply {
            Reply::Media { kinds, caption } => {
                let group = (kinds.len() > 1).then(|| format!("group-{}", self.next_id));
                for (i, kind) in kinds.into_iter().enumerate() {
                    let caption = if i == 0 { caption.clone() } else { None };
                    self.push_attachment(conversation, kind, caption, group.clone());
                }
            }
            Reply::Negative(text) => {
                let id = self.next();
                self.push(
                    conversation,
                    ConversationMessage {
                        id,
                        text: Some(text),
                        ..ConversationMessage::default()
                    },
                );
            }
            Reply::Silent | Reply::Panic => {}
            Reply::Offers(options) => {
                let id = self.next();
                self.push(
                    conversation,
                    ConversationMessage {
                        id,
                        text: Some("Choose a format".to_string()),
                        buttons: options
                            .into_iter()
                            .map(|(label, data)| FormatOffer::new(id, label, data))
                            .collect(),
                        ..ConversationMessage::default()
                    },
                );
            }
            Reply::PreviewThenVideo => {
                let id = self.next();
                self.push(
                    conversation,
                    ConversationMessage {
                        id,
                        text: Some("https://example.com/preview".to_string()),
                        link_preview: true,
                        ..ConversationMessage::default()
                    },
                );
                self.push_attachment(conversation, AttachmentKind::Photo, None, None);
                self.push_attachment(conversation, AttachmentKind::Video, None, None);
            }
        }
    }
}

#[async_trait]
impl ResponderTransport for FakeResponder {
    async fn send_text(&self, conversation: &str, text: &str) -> Result<i64> {
        let (id, reply) = {
            let mut state = lock(&self.state);
            state.calls += 1;
            if !state.connected {
                return Err(Error::Gateway("not connected".to_string()));
            }
            if text == "/start" {
                state.primes += 1;
            } else {
                state.url_attempts += 1;
                if let Some(retry_after) = state.cooldown.take() {
                    return Err(Error::RateLimited { retry_after });
                }
            }
            if text != "/start" && state.session_faults > 0 {
                state.session_faults -= 1;
                return Err(Error::SessionInvalid("AUTH_KEY_DUPLICATED".to_string()));
            }

            let id = state.next();
            state.push(
                conversation,
                ConversationMessage {
                    id,
                    text: Some(text.to_string()),
                    outgoing: true,
                    ..ConversationMessage::default()
                },
            );
            if text == "/start" {
                return Ok(id);
            }

            state.sent_urls.push(text.to_string());
            let reply = state.replies.get(text).cloned().unwrap_or_else(Reply::video);
            (id, reply)
        };

        self.record(format!("send {text}"));
        if matches!(reply, Reply::Panic) {
            panic!("responder exploded");
        }
        lock(&self.state).answer(conversation, reply);
        Ok(id)
    }

    async fn list_recent_messages(
        &self,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let mut state = lock(&self.state);
        state.calls += 1;
        let messages = state
            .conversations
            .get(conversation)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        Ok(messages.into_iter().rev().take(limit).collect())
    }

    async fn click_button(&self, conversation: &str, token: &SelectionToken) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.clicked.push(token.data.clone());
        state.push_attachment(
            conversation,
            AttachmentKind::Video,
            Some(format!("quality {}", token.data)),
            None,
        );
        Ok(())
    }

    async fn download_media(&self, _: &str, message_id: i64) -> Result<Vec<u8>> {
        lock(&self.state).calls += 1;
        Ok(format!("bytes of {message_id}").into_bytes())
    }

    async fn resolve_conversation(&self, conversation: &str) -> Result<()> {
        lock(&self.state).calls += 1;
        self.record(format!("resolve {conversation}"));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.connected = false;
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.connected = true;
        state.reconnects += 1;
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state.authorized)
    }
}

/// One archived upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub kinds: Vec<AttachmentKind>,
    pub caption: String,
    pub buffered: usize,
    pub reference: ArchiveReference,
}

/// Archive store that records uploads
pub struct FakeStore {
    next_id: Mutex<i64>,
    uploads: Mutex<Vec<Upload>>,
    failing: Mutex<bool>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeStore {
    #[must_use]
    pub fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            next_id: Mutex::new(1000),
            uploads: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
            events,
        }
    }

    /// Reject every upload from now on
    pub fn fail_uploads(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn uploads(&self) -> Vec<Upload> {
        lock(&self.uploads).clone()
    }

    fn store(&self, items: &[UploadItem], caption: &str) -> Result<ArchiveReference> {
        if *lock(&self.failing) {
            return Err(Error::Archive("storage chat rejected upload".to_string()));
        }

        let mut next = lock(&self.next_id);
        *next += i64::try_from(items.len()).unwrap_or(1);
        let reference = ArchiveReference {
            archive_location_id: ARCHIVE_CHAT,
            message_id: *next,
        };
        drop(next);

        lock(&self.uploads).push(Upload {
            kinds: items.iter().map(|item| item.kind).collect(),
            caption: caption.to_string(),
            buffered: items
                .iter()
                .filter(|item| matches!(item.payload, UploadPayload::Buffer { .. }))
                .count(),
            reference,
        });
        lock(&self.events).push(format!("upload {reference}"));
        Ok(reference)
    }
}

#[async_trait]
impl ArchiveStore for FakeStore {
    async fn upload_media(&self, item: UploadItem, caption: &str) -> Result<ArchiveReference> {
        self.store(std::slice::from_ref(&item), caption)
    }

    async fn upload_album(&self, items: Vec<UploadItem>, caption: &str) -> Result<ArchiveReference> {
        self.store(&items, caption)
    }

    async fn fetch_media(&self, reference: &ArchiveReference) -> Result<Vec<u8>> {
        Ok(format!("archived {reference}").into_bytes())
    }

    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}

/// A running dispatcher over fakes
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub responder: Arc<FakeResponder>,
    pub store: Arc<FakeStore>,
    pub clock: Arc<StepClock>,
    pub cache: CacheRepo,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Dispatcher with the default responder profiles
    #[must_use]
    pub fn start() -> Self {
        Self::with_profiles(Platform::ALL.map(ResponderProfile::for_platform))
    }

    /// Dispatcher with custom responder profiles
    #[must_use]
    pub fn with_profiles(profiles: impl IntoIterator<Item = ResponderProfile>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let responder = Arc::new(FakeResponder::new(events.clone()));
        let store = Arc::new(FakeStore::new(events.clone()));
        let clock = Arc::new(StepClock::new());
        let cache = CacheRepo::new(setup_test_db());

        let identity = Arc::new(SharedIdentity::new(
            responder.clone(),
            clock.clone(),
            Duration::from_secs(5),
        ));
        let uploader = StorageUploader::new(store.clone(), ATTRIBUTION);
        let processor = JobProcessor::new(identity, profiles, uploader, cache.clone());

        Self {
            dispatcher: Dispatcher::start(processor),
            responder,
            store,
            clock,
            cache,
            events,
        }
    }

    /// Event log shared by the responder and the store
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }
}
