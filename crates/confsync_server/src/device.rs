//! Device notifier.

use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerContext;
use crate::retry::TaskRetry;
use crate::transport::DeliveryError;
use confsync_protocol::{PushOutcome, Task};
use confsync_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a device ping did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Retry budget exhausted or invalid.
    Abandoned,
    /// Message delivered.
    Delivered,
    /// Message delivered; the endpoint was replaced by this one.
    Rotated(String),
    /// Endpoint is permanently invalid and was deleted.
    Removed,
    /// Delivery failed transiently and was scheduled again.
    Rescheduled(Duration),
    /// Delivery failed with no way to recover.
    Dropped,
}

/// Delivers one push message to one device endpoint.
pub struct DeviceNotifier<S> {
    context: Arc<HandlerContext<S>>,
}

impl<S: Store> DeviceNotifier<S> {
    /// Creates a new device notifier.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Pings the device at `endpoint` owned by `uid`.
    ///
    /// Only a failure to reschedule a transient delivery is reported as an
    /// error, so that the task queue runs the whole ping again.
    pub fn ping_device(&self, retry: TaskRetry, uid: &str, endpoint: &str) -> ServerResult<Delivery> {
        let config = &self.context.config;
        if retry.should_abandon(config.max_task_retry) {
            error!(uid, endpoint, retry = ?retry.count(), "abandoning device ping");
            return Ok(Delivery::Abandoned);
        }
        if uid.is_empty() || endpoint.is_empty() {
            return Err(ServerError::InvalidRequest(format!(
                "ping device: uid = {uid:?}, endpoint = {endpoint:?}"
            )));
        }

        match self.context.services.push.send(endpoint, config.push_ttl) {
            Ok(None) => {
                debug!(uid, endpoint, "delivered");
                Ok(Delivery::Delivered)
            }
            Ok(Some(rotated)) => {
                self.rotate(uid, endpoint, &rotated);
                Ok(Delivery::Rotated(rotated))
            }
            Err(DeliveryError::Transport(message)) => {
                warn!(uid, endpoint, error = %message, "unrecoverable delivery error");
                Ok(Delivery::Dropped)
            }
            Err(DeliveryError::Rejected(outcome)) => self.handle_rejection(uid, endpoint, outcome),
        }
    }

    fn handle_rejection(&self, uid: &str, endpoint: &str, outcome: PushOutcome) -> ServerResult<Delivery> {
        warn!(uid, endpoint, remove = outcome.remove, retry = outcome.retry, after = ?outcome.after, "delivery rejected");

        if outcome.remove {
            self.remove(uid, endpoint);
            return Ok(Delivery::Removed);
        }
        if !outcome.should_retry() {
            return Ok(Delivery::Dropped);
        }

        let task = Task::PingDevice {
            uid: uid.to_string(),
            endpoint: endpoint.to_string(),
        };
        if let Err(e) = self.context.services.queue.schedule(task, outcome.after) {
            error!(uid, endpoint, error = %e, "could not reschedule delivery");
            return Err(e.into());
        }
        Ok(Delivery::Rescheduled(outcome.after))
    }

    /// Persists an endpoint rotation. Failures are only logged; the next
    /// delivery reports the rotation again.
    fn rotate(&self, uid: &str, old: &str, new: &str) {
        let result = self.context.store.run_in_transaction(|txn| {
            let mut push = txn.user_push_info(uid)?;
            if push.replace_endpoint(old, new) {
                txn.store_user_push_info(uid, push)?;
            }
            Ok::<_, ServerError>(())
        });
        match result {
            Ok(()) => info!(uid, old, new, "endpoint rotated"),
            Err(e) => error!(uid, old, new, error = %e, "could not store rotated endpoint"),
        }
    }

    fn remove(&self, uid: &str, endpoint: &str) {
        let result = self.context.store.run_in_transaction(|txn| {
            let mut push = txn.user_push_info(uid)?;
            if push.remove_endpoint(endpoint) {
                txn.store_user_push_info(uid, push)?;
            }
            Ok::<_, ServerError>(())
        });
        match result {
            Ok(()) => info!(uid, endpoint, "endpoint removed"),
            Err(e) => error!(uid, endpoint, error = %e, "could not remove endpoint"),
        }
    }
}
