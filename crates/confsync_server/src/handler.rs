//! Trigger routing.

use crate::auth::Caller;
use crate::clock::ClockScheduler;
use crate::config::ServerConfig;
use crate::device::DeviceNotifier;
use crate::dispatch::Dispatcher;
use crate::sync::SyncCoordinator;
use crate::transport::{BookmarkSource, ManifestSource, PushTransport, TaskQueue};
use chrono::Utc;
use confsync_protocol::Task;
use confsync_storage::{Cache, Store};
use std::sync::Arc;
use tracing::{debug, error, info_span};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Counter cache holding the sync guard.
    pub cache: Arc<dyn Cache>,
    /// Upstream manifest.
    pub manifest: Arc<dyn ManifestSource>,
    /// Push delivery.
    pub push: Arc<dyn PushTransport>,
    /// Background task queue.
    pub queue: Arc<dyn TaskQueue>,
    /// Users' bookmarks.
    pub bookmarks: Arc<dyn BookmarkSource>,
}

/// Context shared by all trigger handlers.
pub struct HandlerContext<S> {
    /// Pipeline configuration.
    pub config: ServerConfig,
    /// Transactional store.
    pub store: Arc<S>,
    /// External services.
    pub services: Collaborators,
}

impl<S: Store> HandlerContext<S> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<S>, services: Collaborators) -> Self {
        Self {
            config,
            store,
            services,
        }
    }
}

/// Outcome of one trigger, as reported to the caller.
///
/// The task queue delivers a trigger again when the status is 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
}

impl Response {
    /// 200 OK.
    pub const OK: Response = Response { status: 200 };

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the task queue should retry.
    pub fn should_retry(&self) -> bool {
        self.status >= 500
    }
}

/// Routes triggers to pipeline components.
pub struct RequestHandler<S> {
    sync: SyncCoordinator<S>,
    dispatcher: Dispatcher<S>,
    devices: DeviceNotifier<S>,
    clock: ClockScheduler<S>,
}

impl<S: Store> RequestHandler<S> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self {
            sync: SyncCoordinator::new(Arc::clone(&context)),
            dispatcher: Dispatcher::new(Arc::clone(&context)),
            devices: DeviceNotifier::new(Arc::clone(&context)),
            clock: ClockScheduler::new(context),
        }
    }

    /// Handles one trigger.
    ///
    /// Errors are logged and turned into a status code; they never reach
    /// the caller as a message.
    pub fn handle(&self, task: Task, caller: &Caller) -> Response {
        let name = task.name();
        let span = info_span!("task", task = name);
        let _entered = span.enter();

        let retry = caller.retry();
        let result = match task {
            Task::Sync { if_modified_since } => self.sync.sync(caller, if_modified_since).map(drop),
            Task::NotifySubscribers { sessions, all } => {
                self.dispatcher.handle_notify_subscribers(retry, &sessions, all)
            }
            Task::PingUser { uid, sessions, all } => {
                self.dispatcher.ping_user(retry, &uid, &sessions, all).map(drop)
            }
            Task::PingDevice { uid, endpoint } => {
                self.devices.ping_device(retry, &uid, &endpoint).map(drop)
            }
            Task::Clock => self.clock.tick(caller, Utc::now()).map(drop),
        };

        match result {
            Ok(()) => {
                debug!("task done");
                Response::OK
            }
            Err(e) => {
                let status = e.status_code();
                error!(error = %e, status, "task failed");
                Response { status }
            }
        }
    }

    /// Returns the sync coordinator.
    pub fn sync(&self) -> &SyncCoordinator<S> {
        &self.sync
    }

    /// Returns the notification dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Returns the device notifier.
    pub fn devices(&self) -> &DeviceNotifier<S> {
        &self.devices
    }

    /// Returns the clock scheduler.
    pub fn clock(&self) -> &ClockScheduler<S> {
        &self.clock
    }
}
