//! Pipeline facade.

use crate::auth::Caller;
use crate::config::ServerConfig;
use crate::dispatch;
use crate::error::{ServerError, ServerResult};
use crate::handler::{Collaborators, HandlerContext, RequestHandler, Response};
use crate::sync::SyncOutcome;
use chrono::{DateTime, Utc};
use confsync_protocol::{ChangeSet, Task, UpdateKind};
use confsync_storage::Store;
use std::sync::Arc;
use tracing::info;

/// The sync and push notification pipeline.
///
/// Triggers arrive through [`PushServer::handle`], typically from an HTTP
/// layer that turns scheduler and task-queue requests into a [`Task`] and a
/// [`Caller`].
///
/// # Example
///
/// ```
/// use confsync_server::{
///     Caller, Collaborators, MemoryBookmarks, MemoryTaskQueue, MockManifestSource,
///     MockPushTransport, PushServer, ServerConfig,
/// };
/// use confsync_protocol::Task;
/// use confsync_storage::{MemoryCache, MemoryStore};
/// use std::sync::Arc;
///
/// let queue = Arc::new(MemoryTaskQueue::new());
/// let server = PushServer::new(
///     ServerConfig::default(),
///     Arc::new(MemoryStore::new()),
///     Collaborators {
///         cache: Arc::new(MemoryCache::new()),
///         manifest: Arc::new(MockManifestSource::new()),
///         push: Arc::new(MockPushTransport::new()),
///         queue: queue.clone(),
///         bookmarks: Arc::new(MemoryBookmarks::new()),
///     },
/// );
///
/// let response = server.handle(Task::Sync { if_modified_since: None }, &Caller::cron());
/// assert!(response.is_success());
/// assert!(queue.is_empty());
/// ```
pub struct PushServer<S> {
    handler: RequestHandler<S>,
    context: Arc<HandlerContext<S>>,
}

impl<S: Store> PushServer<S> {
    /// Creates a new server.
    pub fn new(config: ServerConfig, store: Arc<S>, services: Collaborators) -> Self {
        let context = Arc::new(HandlerContext::new(config, store, services));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles one trigger.
    pub fn handle(&self, task: Task, caller: &Caller) -> Response {
        self.handler.handle(task, caller)
    }

    /// Runs one sync and reports what it did.
    pub fn sync(&self, caller: &Caller, if_modified_since: Option<DateTime<Utc>>) -> ServerResult<SyncOutcome> {
        self.handler.sync().sync(caller, if_modified_since)
    }

    /// Runs one clock tick at `now`.
    pub fn tick_clock(&self, caller: &Caller, now: DateTime<Utc>) -> ServerResult<Option<ChangeSet>> {
        self.handler.clock().tick(caller, now)
    }

    /// Stores a hand-made change set and notifies about it.
    ///
    /// An unset timestamp defaults to now. Everyone is notified when any
    /// session carries a survey update.
    pub fn inject_changes(&self, mut changes: ChangeSet) -> ServerResult<()> {
        if changes.updated == DateTime::<Utc>::default() {
            changes.updated = Utc::now();
        }
        let all = changes.has_update(UpdateKind::Survey);
        let queue = self.context.services.queue.as_ref();

        self.context.store.run_in_transaction(|txn| {
            txn.store_changes(&changes)?;
            dispatch::notify(queue, &changes, all)?;
            Ok::<_, ServerError>(())
        })?;
        info!(sessions = changes.sessions.len(), all, "injected changes");
        Ok(())
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.context.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler<S> {
        &self.handler
    }
}
