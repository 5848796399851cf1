//! Trigger authorization.
//!
//! Sync may be started by the periodic scheduler, the task queue, or anyone
//! presenting the shared sync token. Clock ticks come from the scheduler,
//! or from a first-time task execution.

use crate::config::ServerConfig;
use crate::retry::TaskRetry;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_CONTEXT: &[u8] = b"confsync sync token";

/// Who invoked a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Invoked by the periodic scheduler.
    pub cron: bool,
    /// Task name, if invoked by the task queue.
    pub task_name: Option<String>,
    /// Channel token presented with the request.
    pub channel_token: Option<String>,
    /// Raw execution count reported by the task queue.
    pub execution_count: Option<String>,
}

impl Caller {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// The periodic scheduler.
    pub fn cron() -> Self {
        Self {
            cron: true,
            ..Self::default()
        }
    }

    /// The task queue, on its `execution_count`-th run of `task_name`.
    pub fn task_queue(task_name: impl Into<String>, execution_count: u32) -> Self {
        Self {
            task_name: Some(task_name.into()),
            execution_count: Some(execution_count.to_string()),
            ..Self::default()
        }
    }

    /// Attaches a channel token.
    #[must_use]
    pub fn with_channel_token(mut self, token: impl Into<String>) -> Self {
        self.channel_token = Some(token.into());
        self
    }

    /// Returns true if the task queue sent this request.
    pub fn is_task_queue(&self) -> bool {
        self.task_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Returns the retry budget of this invocation.
    pub fn retry(&self) -> TaskRetry {
        TaskRetry::from_header(self.execution_count.as_deref())
    }

    /// Returns true if this caller may start a sync.
    pub fn may_sync(&self, config: &ServerConfig) -> bool {
        if self.cron || self.is_task_queue() {
            return true;
        }
        match (&config.sync_token, &self.channel_token) {
            (Some(expected), Some(presented)) => tokens_match(expected, presented),
            _ => false,
        }
    }

    /// Returns true if this caller may tick the clock.
    ///
    /// Anyone but the periodic scheduler is refused once the execution
    /// count shows an earlier attempt. A caller without a count is let in.
    pub fn may_tick_clock(&self) -> bool {
        self.cron || !self.retry().count().is_some_and(|retry| retry > 0)
    }
}

/// Compares two tokens in constant time.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let tag = match HmacSha256::new_from_slice(expected.as_bytes()) {
        Ok(mut mac) => {
            mac.update(TOKEN_CONTEXT);
            mac.finalize().into_bytes()
        }
        Err(_) => return false,
    };
    match HmacSha256::new_from_slice(presented.as_bytes()) {
        Ok(mut mac) => {
            mac.update(TOKEN_CONTEXT);
            mac.verify_slice(&tag).is_ok()
        }
        Err(_) => false,
    }
}
