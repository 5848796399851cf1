//! Retry budget of background tasks.
//!
//! The task queue reports how many times it has executed a task. The retry
//! count is that number minus one: the first execution is retry zero.

use std::time::Duration;

/// Retry count of one task invocation.
///
/// An invalid budget comes from a missing or unparsable execution count.
/// Task handlers abandon such invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRetry(Option<u32>);

impl TaskRetry {
    /// The first execution of a task.
    pub const FIRST: TaskRetry = TaskRetry(Some(0));

    /// Parses the execution count reported by the task queue.
    pub fn from_header(value: Option<&str>) -> Self {
        let count = value
            .and_then(|v| v.trim().parse::<u32>().ok())
            .and_then(|n| n.checked_sub(1));
        TaskRetry(count)
    }

    /// Creates a budget from an execution count (1 for the first run).
    pub fn from_execution_count(count: u32) -> Self {
        TaskRetry(count.checked_sub(1))
    }

    /// Returns the number of retries already made.
    pub fn count(&self) -> Option<u32> {
        self.0
    }

    /// Returns true if the execution count was present and valid.
    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    /// Returns true if more than `ceiling` retries were made.
    pub fn exceeds(&self, ceiling: u32) -> bool {
        self.0.is_some_and(|n| n > ceiling)
    }

    /// Returns true if the task must be dropped without doing any work.
    pub fn should_abandon(&self, ceiling: u32) -> bool {
        !self.is_valid() || self.exceeds(ceiling)
    }
}

/// Pause before scheduling attempt `attempt + 1`: `attempt × unit`.
pub fn delivery_pause(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt)
}
