//! Pipeline configuration.

use crate::error::{ServerError, ServerResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default base URL used to upgrade legacy subscriber IDs.
pub const DEFAULT_LEGACY_PUSH_ENDPOINT: &str = "https://android.googleapis.com/gcm/send";

/// Configuration for the sync and notification pipeline.
///
/// Durations are given in seconds when loaded from JSON. Missing fields take
/// their default value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared secret accepted as a channel token on the sync trigger.
    pub sync_token: Option<String>,
    /// Upstream manifest URL.
    pub manifest_url: String,
    /// Base URL for upgraded legacy subscribers.
    pub legacy_push_endpoint: String,
    /// Retries after which a task is abandoned.
    pub max_task_retry: u32,
    /// Attempts at scheduling per-device deliveries for one user.
    pub device_ping_attempts: u32,
    /// Pause unit between scheduling attempts.
    #[serde(deserialize_with = "seconds")]
    pub device_ping_pause: Duration,
    /// Expiry of the sync guard counter.
    #[serde(deserialize_with = "seconds")]
    pub sync_guard_ttl: Duration,
    /// How far ahead the clock looks for starting sessions.
    #[serde(deserialize_with = "seconds")]
    pub start_lookahead: Duration,
    /// How long before a session ends its survey opens.
    #[serde(deserialize_with = "seconds")]
    pub survey_lead: Duration,
    /// Time-to-live attached to each push message.
    #[serde(deserialize_with = "seconds")]
    pub push_ttl: Duration,
}

impl ServerConfig {
    /// Creates a configuration for the given manifest URL.
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> ServerResult<Self> {
        serde_json::from_str(json).map_err(|e| ServerError::InvalidRequest(format!("config: {e}")))
    }

    /// Sets the shared sync token.
    #[must_use]
    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }

    /// Sets the legacy push endpoint base.
    #[must_use]
    pub fn with_legacy_push_endpoint(mut self, base: impl Into<String>) -> Self {
        self.legacy_push_endpoint = base.into();
        self
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub const fn with_max_task_retry(mut self, max: u32) -> Self {
        self.max_task_retry = max;
        self
    }

    /// Sets the device scheduling attempts and pause unit.
    #[must_use]
    pub const fn with_device_ping_retry(mut self, attempts: u32, pause: Duration) -> Self {
        self.device_ping_attempts = attempts;
        self.device_ping_pause = pause;
        self
    }

    /// Sets the sync guard expiry.
    #[must_use]
    pub const fn with_sync_guard_ttl(mut self, ttl: Duration) -> Self {
        self.sync_guard_ttl = ttl;
        self
    }

    /// Sets the clock windows.
    #[must_use]
    pub const fn with_clock_windows(mut self, start_lookahead: Duration, survey_lead: Duration) -> Self {
        self.start_lookahead = start_lookahead;
        self.survey_lead = survey_lead;
        self
    }

    /// Sets the push message TTL.
    #[must_use]
    pub const fn with_push_ttl(mut self, ttl: Duration) -> Self {
        self.push_ttl = ttl;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sync_token: None,
            manifest_url: String::new(),
            legacy_push_endpoint: DEFAULT_LEGACY_PUSH_ENDPOINT.to_string(),
            max_task_retry: 10,
            device_ping_attempts: 6,
            device_ping_pause: Duration::from_secs(1),
            sync_guard_ttl: Duration::from_secs(10 * 60),
            start_lookahead: Duration::from_secs(10 * 60),
            survey_lead: Duration::from_secs(15 * 60),
            push_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(D::Error::custom("expected a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}
