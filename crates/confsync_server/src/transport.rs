//! Outbound collaborators of the pipeline.
//!
//! Each collaborator is a trait so the pipeline can run against real
//! services or against the in-memory implementations below.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use confsync_protocol::{EventData, PushOutcome, Task};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// A task could not be handed to the queue.
#[derive(Debug, Clone, Error)]
#[error("task queue error: {message}")]
pub struct QueueError {
    message: String,
}

impl QueueError {
    /// Creates a queue error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A push delivery failed.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The provider rejected the message with structured signals.
    #[error("push rejected (remove: {}, retry: {}, after: {:?})", .0.remove, .0.retry, .0.after)]
    Rejected(PushOutcome),

    /// Any other failure; carries no retry or removal signal.
    #[error("push transport error: {0}")]
    Transport(String),
}

/// Loading a user's bookmarks failed.
#[derive(Debug, Clone, Error)]
pub enum BookmarkError {
    /// The user has no stored credentials.
    #[error("bookmarks: missing credentials")]
    AuthMissing,

    /// The stored credentials were rejected.
    #[error("bookmarks: invalid credentials")]
    AuthInvalid,

    /// The bookmark service failed.
    #[error("bookmarks unavailable: {0}")]
    Unavailable(String),
}

impl BookmarkError {
    /// Returns true if retrying can never succeed.
    pub fn is_auth(&self) -> bool {
        matches!(self, BookmarkError::AuthMissing | BookmarkError::AuthInvalid)
    }
}

/// Source of upstream event data.
pub trait ManifestSource: Send + Sync {
    /// Fetches event data modified after `since`.
    ///
    /// Returns `Ok(None)` when the upstream reports no changes.
    fn fetch(&self, url: &str, since: Option<DateTime<Utc>>) -> ServerResult<Option<EventData>>;
}

/// Delivers push messages to device endpoints.
pub trait PushTransport: Send + Sync {
    /// Sends one message to `endpoint`.
    ///
    /// On success, returns the endpoint's replacement if the provider
    /// rotated it.
    fn send(&self, endpoint: &str, ttl: Duration) -> Result<Option<String>, DeliveryError>;
}

/// Schedules background tasks.
pub trait TaskQueue: Send + Sync {
    /// Enqueues `task` to run after `delay`.
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), QueueError>;
}

/// Source of users' bookmarked session IDs.
pub trait BookmarkSource: Send + Sync {
    /// Returns the session IDs bookmarked by `uid`.
    fn bookmarks(&self, uid: &str) -> Result<Vec<String>, BookmarkError>;
}

/// A mock manifest source for testing.
///
/// Behaves like a conditional GET: data is returned only if its `modified`
/// stamp is newer than the requested `since`.
#[derive(Debug, Default)]
pub struct MockManifestSource {
    data: Mutex<Option<EventData>>,
    failure: Mutex<Option<String>>,
    requests: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl MockManifestSource {
    /// Creates a source with no data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data served upstream.
    pub fn set_data(&self, data: EventData) {
        *self.data.lock() = Some(data);
    }

    /// Makes every fetch fail with `message`, or succeed again with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Returns the `since` argument of every fetch so far.
    pub fn requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.requests.lock().clone()
    }
}

impl ManifestSource for MockManifestSource {
    fn fetch(&self, _url: &str, since: Option<DateTime<Utc>>) -> ServerResult<Option<EventData>> {
        self.requests.lock().push(since);
        if let Some(message) = self.failure.lock().clone() {
            return Err(ServerError::upstream(message));
        }
        let data = self.data.lock().clone();
        Ok(data.filter(|d| match (d.modified, since) {
            (Some(modified), Some(since)) => modified > since,
            _ => true,
        }))
    }
}

/// A mock push transport for testing.
///
/// Replies can be scripted per endpoint; unscripted sends succeed.
#[derive(Debug, Default)]
pub struct MockPushTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<Option<String>, DeliveryError>>>>,
    sent: Mutex<Vec<String>>,
}

impl MockPushTransport {
    /// Creates a transport where every send succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the reply for the next send to `endpoint`.
    pub fn push_reply(&self, endpoint: impl Into<String>, reply: Result<Option<String>, DeliveryError>) {
        self.replies
            .lock()
            .entry(endpoint.into())
            .or_default()
            .push_back(reply);
    }

    /// Returns every endpoint sent to, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl PushTransport for MockPushTransport {
    fn send(&self, endpoint: &str, _ttl: Duration) -> Result<Option<String>, DeliveryError> {
        self.sent.lock().push(endpoint.to_string());
        self.replies
            .lock()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(None))
    }
}

/// An in-memory task queue.
///
/// Records every scheduled task. Can be told to refuse the next few
/// schedule calls.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<VecDeque<(Task, Duration)>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemoryTaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` schedule calls fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Returns the pending tasks without removing them.
    pub fn pending(&self) -> Vec<(Task, Duration)> {
        self.tasks.lock().iter().cloned().collect()
    }

    /// Removes and returns the oldest pending task.
    pub fn pop(&self) -> Option<(Task, Duration)> {
        self.tasks.lock().pop_front()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Number of schedule calls so far, failed ones included.
    pub fn schedule_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(QueueError::new(format!("refused {}", task.name())));
        }
        self.tasks.lock().push_back((task, delay));
        Ok(())
    }
}

/// In-memory bookmarks keyed by user ID.
#[derive(Debug, Default)]
pub struct MemoryBookmarks {
    bookmarks: Mutex<HashMap<String, Result<Vec<String>, BookmarkError>>>,
}

impl MemoryBookmarks {
    /// Creates an empty bookmark source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bookmarks of `uid`.
    pub fn set(&self, uid: impl Into<String>, sessions: impl IntoIterator<Item = impl Into<String>>) {
        let sessions = sessions.into_iter().map(Into::into).collect();
        self.bookmarks.lock().insert(uid.into(), Ok(sessions));
    }

    /// Makes lookups for `uid` fail.
    pub fn set_error(&self, uid: impl Into<String>, error: BookmarkError) {
        self.bookmarks.lock().insert(uid.into(), Err(error));
    }
}

impl BookmarkSource for MemoryBookmarks {
    fn bookmarks(&self, uid: &str) -> Result<Vec<String>, BookmarkError> {
        self.bookmarks
            .lock()
            .get(uid)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
