//! Sync coordinator.
//!
//! Pulls the upstream manifest, stores it as the canonical event data,
//! records the diff against the previous version and hands the diff to the
//! notification dispatcher. All of it happens in one transaction, under the
//! single-flight sync guard.

use crate::auth::Caller;
use crate::dispatch;
use crate::error::ServerResult;
use crate::guard::{SyncGuard, SYNC_GUARD_KEY};
use crate::handler::HandlerContext;
use chrono::{DateTime, Utc};
use confsync_protocol::{diff_event_data, ChangeSet};
use confsync_storage::{Store, Transaction};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a sync run did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Caller is not privileged; nothing was done.
    Unauthorized,
    /// Task queue delivery past the retry ceiling; nothing was done.
    Abandoned,
    /// Another sync is in flight; nothing was done.
    Busy,
    /// Upstream had no new data.
    NotModified,
    /// New data was stored but nothing changed.
    Unchanged,
    /// New data was stored and its diff handed to the dispatcher.
    Synced(ChangeSet),
}

/// Runs guarded sync transactions.
pub struct SyncCoordinator<S> {
    context: Arc<HandlerContext<S>>,
}

impl<S: Store> SyncCoordinator<S> {
    /// Creates a new coordinator.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Runs one sync.
    ///
    /// `if_modified_since` overrides the stored `modified` stamp used for
    /// the conditional fetch. Unauthorized callers and concurrent runs are
    /// no-ops, not errors.
    pub fn sync(
        &self,
        caller: &Caller,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> ServerResult<SyncOutcome> {
        let config = &self.context.config;
        if !caller.may_sync(config) {
            warn!(cron = caller.cron, task = ?caller.task_name, "not performing sync: caller not privileged");
            return Ok(SyncOutcome::Unauthorized);
        }
        if caller.is_task_queue() && caller.retry().should_abandon(config.max_task_retry) {
            error!(retry = ?caller.retry().count(), "abandoning sync");
            return Ok(SyncOutcome::Abandoned);
        }

        let cache = self.context.services.cache.as_ref();
        let Some(_guard) = SyncGuard::acquire(cache, SYNC_GUARD_KEY, config.sync_guard_ttl)? else {
            info!("sync already running");
            return Ok(SyncOutcome::Busy);
        };

        let result = self
            .context
            .store
            .run_in_transaction(|txn| self.sync_in(txn, if_modified_since));
        if let Err(e) = &result {
            error!(error = %e, "sync failed");
        }
        result
    }

    fn sync_in(
        &self,
        txn: &mut dyn Transaction,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> ServerResult<SyncOutcome> {
        let url = self.context.config.manifest_url.as_str();
        let old = txn.latest_event_data()?;
        let since = if_modified_since.or(old.modified);

        let fetched = self.context.services.manifest.fetch(url, since)?;
        let Some(mut new) = fetched.filter(|d| !d.is_empty()) else {
            info!(url, last = ?old.modified, "no data or not modified");
            return Ok(SyncOutcome::NotModified);
        };

        if new.modified.is_none() {
            new.modified = Some(Utc::now());
        }
        new.etag = new.compute_etag();
        txn.store_event_data(new.clone())?;

        let changes = diff_event_data(&old, &new);
        if changes.is_empty() {
            info!(url, etag = %new.etag, "diff is empty");
            return Ok(SyncOutcome::Unchanged);
        }
        txn.store_changes(&changes)?;

        dispatch::notify(self.context.services.queue.as_ref(), &changes, false)?;
        info!(
            sessions = changes.sessions.len(),
            speakers = changes.speakers.len(),
            videos = changes.videos.len(),
            tags = changes.tags.len(),
            "event data synced"
        );
        Ok(SyncOutcome::Synced(changes))
    }
}
