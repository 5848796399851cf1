//! HTTP adapters for the outbound collaborators.
//!
//! The actual HTTP client is abstracted via a trait so any library can be
//! plugged in (reqwest, ureq, hyper...).

use crate::error::{ServerError, ServerResult};
use crate::transport::{DeliveryError, ManifestSource, PushTransport};
use chrono::{DateTime, Utc};
use confsync_protocol::{EventData, PushOutcome};
use serde::Deserialize;
use std::time::Duration;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, String>;

    /// Sends a POST request.
    fn post(&self, url: &str, headers: &[(String, String)], body: Vec<u8>) -> Result<HttpResponse, String>;
}

/// A received HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn retry_after(&self) -> Duration {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_default()
    }
}

/// Formats a timestamp as an HTTP date.
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Manifest source fetching JSON event data with a conditional GET.
pub struct HttpManifestSource<C: HttpClient> {
    client: C,
}

impl<C: HttpClient> HttpManifestSource<C> {
    /// Creates a new manifest source.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: HttpClient> ManifestSource for HttpManifestSource<C> {
    fn fetch(&self, url: &str, since: Option<DateTime<Utc>>) -> ServerResult<Option<EventData>> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(since) = since {
            headers.push(("If-Modified-Since".to_string(), http_date(since)));
        }

        let response = self
            .client
            .get(url, &headers)
            .map_err(|e| ServerError::upstream(format!("{url}: {e}")))?;
        match response.status {
            304 => Ok(None),
            200 => {
                let mut data: EventData = serde_json::from_slice(&response.body)
                    .map_err(|e| ServerError::upstream(format!("{url}: decode: {e}")))?;
                if let Some(modified) = response.header("last-modified").and_then(parse_http_date) {
                    data.modified = Some(modified);
                }
                Ok(Some(data))
            }
            status => Err(ServerError::upstream(format!("{url}: status {status}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GcmReply {
    #[serde(default)]
    results: Vec<GcmResult>,
}

#[derive(Debug, Deserialize)]
struct GcmResult {
    #[serde(default)]
    registration_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Push transport speaking the GCM HTTP protocol.
///
/// Endpoints under the GCM base URL are sent through the GCM JSON API,
/// anything else gets an empty web push POST.
pub struct GcmPushTransport<C: HttpClient> {
    client: C,
    base: String,
    api_key: Option<String>,
}

impl<C: HttpClient> GcmPushTransport<C> {
    /// Creates a transport for endpoints under `base`.
    pub fn new(client: C, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Sets the server API key sent with GCM requests.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn send_gcm(&self, registration_id: &str, ttl: Duration) -> Result<Option<String>, DeliveryError> {
        let body = serde_json::json!({
            "registration_ids": [registration_id],
            "time_to_live": ttl.as_secs(),
        });
        let body = serde_json::to_vec(&body).map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(key) = &self.api_key {
            headers.push(("Authorization".to_string(), format!("key={key}")));
        }

        let response = self
            .client
            .post(&self.base, &headers, body)
            .map_err(DeliveryError::Transport)?;
        if response.status != 200 {
            return Err(status_error(&response));
        }

        let reply: GcmReply = serde_json::from_slice(&response.body)
            .map_err(|e| DeliveryError::Transport(format!("decode gcm reply: {e}")))?;
        let Some(result) = reply.results.into_iter().next() else {
            return Ok(None);
        };
        match result.error.as_deref() {
            Some("NotRegistered" | "InvalidRegistration") => {
                Err(DeliveryError::Rejected(PushOutcome::remove()))
            }
            Some("Unavailable" | "InternalServerError") => Err(DeliveryError::Rejected(
                PushOutcome::retry_after(response.retry_after()),
            )),
            Some(other) => Err(DeliveryError::Transport(format!("gcm: {other}"))),
            None => Ok(result
                .registration_id
                .map(|id| format!("{}/{}", self.base, id))),
        }
    }

    fn send_web_push(&self, endpoint: &str, ttl: Duration) -> Result<Option<String>, DeliveryError> {
        let headers = vec![("TTL".to_string(), ttl.as_secs().to_string())];
        let response = self
            .client
            .post(endpoint, &headers, Vec::new())
            .map_err(DeliveryError::Transport)?;
        if (200..300).contains(&response.status) {
            return Ok(None);
        }
        Err(status_error(&response))
    }
}

/// Maps a non-success status to a delivery error.
fn status_error(response: &HttpResponse) -> DeliveryError {
    match response.status {
        404 | 410 => DeliveryError::Rejected(PushOutcome::remove()),
        429 | 500..=599 => DeliveryError::Rejected(PushOutcome::retry_after(response.retry_after())),
        status => DeliveryError::Transport(format!("push: status {status}")),
    }
}

impl<C: HttpClient> PushTransport for GcmPushTransport<C> {
    fn send(&self, endpoint: &str, ttl: Duration) -> Result<Option<String>, DeliveryError> {
        match endpoint
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(registration_id) if !registration_id.is_empty() => self.send_gcm(registration_id, ttl),
            _ => self.send_web_push(endpoint, ttl),
        }
    }
}
