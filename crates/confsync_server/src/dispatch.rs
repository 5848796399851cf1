//! Notification dispatcher.
//!
//! A change set fans out in three hops, each one a queued task:
//! all users with push enabled, then every device of a user whose bookmarks
//! intersect the change, then one delivery per device.

use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerContext;
use crate::retry::{delivery_pause, TaskRetry};
use crate::transport::{QueueError, TaskQueue};
use confsync_protocol::{ChangeSet, Task};
use confsync_storage::Store;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Hands a change set to the dispatcher without waiting for delivery.
///
/// `all` notifies every subscriber regardless of bookmarks.
pub fn notify(queue: &dyn TaskQueue, changes: &ChangeSet, all: bool) -> ServerResult<()> {
    let task = Task::NotifySubscribers {
        sessions: changes.session_ids(),
        all,
    };
    queue.schedule(task, Duration::ZERO)?;
    Ok(())
}

/// What a per-user ping did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPing {
    /// Retry budget exhausted or invalid.
    Abandoned,
    /// User has notifications turned off.
    Disabled,
    /// Bookmarks could not be read and never will be.
    Unauthorized,
    /// None of the user's bookmarks changed.
    NoMatch,
    /// A delivery was scheduled for this many devices.
    Scheduled(usize),
}

/// Per-user and per-subscriber fan-out.
pub struct Dispatcher<S> {
    context: Arc<HandlerContext<S>>,
}

impl<S: Store> Dispatcher<S> {
    /// Creates a new dispatcher.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Hands a change set to the dispatcher.
    pub fn notify(&self, changes: &ChangeSet, all: bool) -> ServerResult<()> {
        notify(self.context.services.queue.as_ref(), changes, all)
    }

    /// Schedules a ping for every user with push enabled.
    ///
    /// A user whose ping cannot be scheduled is logged and skipped.
    pub fn handle_notify_subscribers(
        &self,
        retry: TaskRetry,
        sessions: &[String],
        all: bool,
    ) -> ServerResult<()> {
        if retry.should_abandon(self.context.config.max_task_retry) {
            error!(retry = ?retry.count(), "abandoning subscriber fan-out");
            return Ok(());
        }
        if sessions.is_empty() && !all {
            info!("empty sessions list; won't notify");
            return Ok(());
        }

        let users = self.context.store.users_with_push()?;
        info!(users = users.len(), "found users with notifications enabled");

        let queue = self.context.services.queue.as_ref();
        for uid in users {
            let task = Task::PingUser {
                uid: uid.clone(),
                sessions: sessions.to_vec(),
                all,
            };
            if let Err(e) = queue.schedule(task, Duration::ZERO) {
                error!(uid = %uid, error = %e, "could not schedule user ping");
            }
        }
        Ok(())
    }

    /// Notifies the devices of one user if the change concerns them.
    ///
    /// Legacy subscribers are upgraded to endpoints and the upgrade is
    /// persisted before anything else happens.
    pub fn ping_user(
        &self,
        retry: TaskRetry,
        uid: &str,
        sessions: &[String],
        all: bool,
    ) -> ServerResult<UserPing> {
        let config = &self.context.config;
        if retry.should_abandon(config.max_task_retry) {
            error!(uid, retry = ?retry.count(), "abandoning user ping");
            return Ok(UserPing::Abandoned);
        }
        if uid.is_empty() || (sessions.is_empty() && !all) {
            return Err(ServerError::InvalidRequest(format!(
                "ping user: uid = {uid:?}, sessions = {sessions:?}, all = {all}"
            )));
        }

        let push = self.context.store.run_in_transaction(|txn| {
            let mut push = txn.user_push_info(uid)?;
            if push.migrate_subscribers(&config.legacy_push_endpoint) {
                info!(uid, endpoints = push.endpoints.len(), "upgraded legacy subscribers");
                txn.store_user_push_info(uid, push.clone())?;
            }
            Ok::<_, ServerError>(push)
        })?;

        if !push.enabled {
            debug!(uid, "notifications not enabled");
            return Ok(UserPing::Disabled);
        }

        if !all {
            let bookmarks = match self.context.services.bookmarks.bookmarks(uid) {
                Ok(bookmarks) => bookmarks,
                Err(e) if e.is_auth() => {
                    warn!(uid, error = %e, "unrecoverable bookmark error");
                    return Ok(UserPing::Unauthorized);
                }
                Err(e) => return Err(ServerError::upstream(e.to_string())),
            };
            let mut changed = sessions.to_vec();
            changed.sort();
            let matched = bookmarks
                .iter()
                .any(|id| changed.binary_search(id).is_ok());
            if !matched {
                debug!(uid, "none of user sessions matched");
                return Ok(UserPing::NoMatch);
            }
        }

        let scheduled = self.schedule_devices(uid, push.endpoints)?;
        Ok(UserPing::Scheduled(scheduled))
    }

    /// Schedules one delivery per endpoint.
    ///
    /// Endpoints that could not be scheduled are tried again, pausing
    /// `attempt × unit` in between, for a bounded number of attempts.
    fn schedule_devices(&self, uid: &str, endpoints: Vec<String>) -> ServerResult<usize> {
        let config = &self.context.config;
        let queue = self.context.services.queue.as_ref();
        let total = endpoints.len();
        let attempts = config.device_ping_attempts.max(1);

        let mut pending = endpoints;
        let mut last_error: Option<QueueError> = None;
        for attempt in 0..attempts {
            let mut failed = Vec::new();
            for endpoint in pending {
                let task = Task::PingDevice {
                    uid: uid.to_string(),
                    endpoint: endpoint.clone(),
                };
                if let Err(e) = queue.schedule(task, Duration::ZERO) {
                    last_error = Some(e);
                    failed.push(endpoint);
                }
            }
            if failed.is_empty() {
                return Ok(total);
            }

            warn!(
                uid,
                failed = failed.len(),
                total,
                attempt,
                attempts,
                "couldn't schedule device pings"
            );
            pending = failed;
            if attempt + 1 < attempts {
                thread::sleep(delivery_pause(attempt, config.device_ping_pause));
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use crate::transport::BookmarkError;
    use confsync_protocol::UserPush;
    use confsync_storage::MemoryStore;

    const BASE: &str = "https://android.googleapis.com/gcm/send";

    fn dispatcher(fx: &Fixture) -> Dispatcher<MemoryStore> {
        Dispatcher::new(Arc::clone(&fx.context))
    }

    fn sessions(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fan_out_skips_failed_users() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        fx.store.put_user("u2", UserPush::enabled_with(["e2"]));
        fx.store.put_user("u3", UserPush::default());
        fx.queue.fail_next(1);

        dispatcher(&fx)
            .handle_notify_subscribers(TaskRetry::FIRST, &sessions(&["s1"]), false)
            .unwrap();
        assert_eq!(
            fx.queued(),
            vec![Task::PingUser {
                uid: "u2".into(),
                sessions: sessions(&["s1"]),
                all: false
            }]
        );
    }

    #[test]
    fn fan_out_with_nothing_to_say() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        dispatcher(&fx)
            .handle_notify_subscribers(TaskRetry::FIRST, &[], false)
            .unwrap();
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn exhausted_budget_does_nothing() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        let retry = TaskRetry::from_execution_count(12);

        dispatcher(&fx)
            .handle_notify_subscribers(retry, &sessions(&["s1"]), true)
            .unwrap();
        let ping = dispatcher(&fx).ping_user(retry, "u1", &[], true).unwrap();
        assert_eq!(ping, UserPing::Abandoned);
        assert_eq!(fx.queue.schedule_attempts(), 0);
    }

    #[test]
    fn bookmark_match_schedules_every_device() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1", "e2"]));
        fx.bookmarks.set("u1", ["s9", "s2"]);

        let ping = dispatcher(&fx)
            .ping_user(TaskRetry::FIRST, "u1", &sessions(&["s3", "s2", "s1"]), false)
            .unwrap();
        assert_eq!(ping, UserPing::Scheduled(2));
        assert_eq!(fx.queue.len(), 2);
    }

    #[test]
    fn no_bookmark_match() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        fx.bookmarks.set("u1", ["s9"]);

        let ping = dispatcher(&fx)
            .ping_user(TaskRetry::FIRST, "u1", &sessions(&["s1"]), false)
            .unwrap();
        assert_eq!(ping, UserPing::NoMatch);
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn disabled_user() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush { enabled: false, ..UserPush::enabled_with(["e1"]) });
        let ping = dispatcher(&fx).ping_user(TaskRetry::FIRST, "u1", &[], true).unwrap();
        assert_eq!(ping, UserPing::Disabled);
    }

    #[test]
    fn bookmark_auth_error_drops_task() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        fx.bookmarks.set_error("u1", BookmarkError::AuthMissing);

        let ping = dispatcher(&fx)
            .ping_user(TaskRetry::FIRST, "u1", &sessions(&["s1"]), false)
            .unwrap();
        assert_eq!(ping, UserPing::Unauthorized);
    }

    #[test]
    fn bookmark_outage_is_retried() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        fx.bookmarks.set_error("u1", BookmarkError::Unavailable("timeout".into()));

        let err = dispatcher(&fx)
            .ping_user(TaskRetry::FIRST, "u1", &sessions(&["s1"]), false)
            .unwrap_err();
        assert!(err.is_server_error());
    }

    #[test]
    fn legacy_subscribers_are_migrated_and_persisted() {
        let fx = Fixture::new();
        fx.store.put_user(
            "u1",
            UserPush {
                enabled: true,
                subscribers: vec!["reg1".into()],
                endpoints: vec!["https://push.example/a".into()],
            },
        );

        dispatcher(&fx).ping_user(TaskRetry::FIRST, "u1", &[], true).unwrap();
        let stored = fx.store.user_push_info("u1").unwrap();
        assert!(stored.subscribers.is_empty());
        assert_eq!(
            stored.endpoints,
            vec!["https://push.example/a".to_string(), format!("{BASE}/reg1")]
        );
    }

    #[test]
    fn device_scheduling_retries_only_failures() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1", "e2", "e3"]));
        fx.queue.fail_next(2);

        let ping = dispatcher(&fx).ping_user(TaskRetry::FIRST, "u1", &[], true).unwrap();
        assert_eq!(ping, UserPing::Scheduled(3));
        assert_eq!(fx.queue.len(), 3);
        // e1 and e2 fail on the first pass, both succeed on the second.
        assert_eq!(fx.queue.schedule_attempts(), 5);
    }

    #[test]
    fn device_scheduling_gives_up() {
        let fx = Fixture::new();
        fx.store.put_user("u1", UserPush::enabled_with(["e1"]));
        fx.queue.fail_next(100);

        let err = dispatcher(&fx).ping_user(TaskRetry::FIRST, "u1", &[], true).unwrap_err();
        assert!(matches!(err, ServerError::Queue(_)));
        assert_eq!(fx.queue.schedule_attempts(), 6);
    }
}
