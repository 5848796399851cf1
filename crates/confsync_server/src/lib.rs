//! # Confsync Server
//!
//! The sync and push notification pipeline of a conference schedule.
//!
//! This crate provides:
//! - A single-flight, transactional sync of the upstream manifest
//! - Fan-out of change sets to users and their devices over a task queue
//! - Per-device delivery with endpoint rotation and removal
//! - A clock that announces sessions about to start and surveys opening
//!
//! # Architecture
//!
//! Every unit of work is a [`Task`](confsync_protocol::Task) run by
//! [`RequestHandler`]. Handlers never retry in-process beyond the device
//! scheduling loop: a 5xx [`Response`] tells the task queue to run the task
//! again, and the retry ceiling drops it after too many attempts.
//!
//! ```text
//! Sync ──┐                 ┌─► PingUser ─► PingDevice ─► PushTransport
//!        ├─► NotifySubscribers
//! Clock ─┘                 └─► PingUser ─► ...
//! ```
//!
//! # Authorization
//!
//! Sync runs only for the periodic scheduler, the task queue, or callers
//! presenting the shared sync token. Anyone else is ignored without an
//! error, so nothing leaks about why.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod clock;
mod config;
mod device;
mod dispatch;
mod error;
mod guard;
mod handler;
mod http;
mod retry;
mod server;
mod sync;
mod transport;

#[cfg(test)]
mod test_support;

pub use auth::Caller;
pub use clock::{marker_key, upcoming_sessions, upcoming_surveys, ClockScheduler};
pub use config::{ServerConfig, DEFAULT_LEGACY_PUSH_ENDPOINT};
pub use device::{Delivery, DeviceNotifier};
pub use dispatch::{notify, Dispatcher, UserPing};
pub use error::{ServerError, ServerResult};
pub use guard::{SyncGuard, SYNC_GUARD_KEY};
pub use handler::{Collaborators, HandlerContext, RequestHandler, Response};
pub use http::{http_date, parse_http_date, GcmPushTransport, HttpClient, HttpManifestSource, HttpResponse};
pub use retry::{delivery_pause, TaskRetry};
pub use server::PushServer;
pub use sync::{SyncCoordinator, SyncOutcome};
pub use transport::{
    BookmarkError, BookmarkSource, DeliveryError, ManifestSource, MemoryBookmarks, MemoryTaskQueue,
    MockManifestSource, MockPushTransport, PushTransport, QueueError, TaskQueue,
};
