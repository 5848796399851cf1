//! Background task descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of background work handed to the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Task {
    /// Pull the upstream manifest and fan out the diff.
    Sync {
        /// Overrides the stored `modified` marker.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        if_modified_since: Option<DateTime<Utc>>,
    },
    /// Fan a change out to every user with push enabled.
    NotifySubscribers {
        /// Changed session IDs.
        sessions: Vec<String>,
        /// Notify regardless of bookmarks.
        all: bool,
    },
    /// Notify the devices of one user if the change concerns them.
    PingUser {
        /// User ID.
        uid: String,
        /// Changed session IDs.
        sessions: Vec<String>,
        /// Notify regardless of bookmarks.
        all: bool,
    },
    /// Deliver one push message to one device endpoint.
    PingDevice {
        /// User ID owning the endpoint.
        uid: String,
        /// Device endpoint.
        endpoint: String,
    },
    /// Look for sessions starting soon or opening their survey.
    Clock,
}

impl Task {
    /// Returns the trigger name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Sync { .. } => "sync",
            Task::NotifySubscribers { .. } => "notify-subscribers",
            Task::PingUser { .. } => "ping-user",
            Task::PingDevice { .. } => "ping-device",
            Task::Clock => "clock",
        }
    }
}
