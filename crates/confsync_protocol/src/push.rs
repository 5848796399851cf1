//! Per-user push subscription state and delivery outcomes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push subscription state of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPush {
    /// Whether the user wants notifications at all.
    #[serde(default)]
    pub enabled: bool,
    /// Legacy subscriber IDs awaiting upgrade to endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribers: Vec<String>,
    /// Delivery endpoints, one per device registration.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl UserPush {
    /// Creates an enabled record with the given endpoints.
    pub fn enabled_with(endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: true,
            subscribers: Vec::new(),
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }

    /// Upgrades legacy subscribers into endpoints under `base`.
    ///
    /// Returns true if anything was migrated. The subscriber list is cleared:
    /// the migration is one-way.
    pub fn migrate_subscribers(&mut self, base: &str) -> bool {
        if self.subscribers.is_empty() {
            return false;
        }
        let subscribers = std::mem::take(&mut self.subscribers);
        self.endpoints = upgrade_subscribers(base, &subscribers, &self.endpoints);
        true
    }

    /// Replaces `old` with `new`, keeping the list free of duplicates.
    ///
    /// Returns false if `old` was not registered.
    pub fn replace_endpoint(&mut self, old: &str, new: &str) -> bool {
        let Some(pos) = self.endpoints.iter().position(|e| e == old) else {
            return false;
        };
        if self.endpoints.iter().any(|e| e == new) {
            self.endpoints.remove(pos);
        } else {
            self.endpoints[pos] = new.to_string();
        }
        true
    }

    /// Removes an endpoint. Returns false if it was not registered.
    pub fn remove_endpoint(&mut self, endpoint: &str) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|e| e != endpoint);
        self.endpoints.len() != before
    }
}

/// Converts legacy subscriber IDs into endpoint URLs under `base`.
///
/// Existing endpoints keep their order; upgraded ones are appended unless
/// already present.
pub fn upgrade_subscribers(base: &str, subscribers: &[String], endpoints: &[String]) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let mut out = endpoints.to_vec();
    for id in subscribers {
        let endpoint = format!("{base}/{id}");
        if !out.contains(&endpoint) {
            out.push(endpoint);
        }
    }
    out
}

/// Structured failure of one delivery attempt.
///
/// The three signals are independent; `remove` always wins over `retry`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// The endpoint is permanently invalid and must be deleted.
    pub remove: bool,
    /// The failure is transient.
    pub retry: bool,
    /// Provider-supplied delay before the next attempt.
    pub after: Duration,
}

impl PushOutcome {
    /// Endpoint is gone for good.
    pub fn remove() -> Self {
        Self {
            remove: true,
            ..Self::default()
        }
    }

    /// Transient failure; try again after `after`.
    pub fn retry_after(after: Duration) -> Self {
        Self {
            retry: true,
            after,
            ..Self::default()
        }
    }

    /// Neither removable nor retryable.
    pub fn unrecoverable() -> Self {
        Self::default()
    }

    /// Returns true if a follow-up delivery should be scheduled.
    pub fn should_retry(&self) -> bool {
        self.retry && !self.remove
    }
}
