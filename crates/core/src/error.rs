//! Error taxonomy and HTTP outcome classification for the Zotero client.
//!
//! Every failure in the upstream client resolves to a [`ZoteroError`] with a
//! [`ErrorKind`] drawn from a closed set. Classification is a pure function
//! over the HTTP status, response headers, and body, so it can be tested
//! exhaustively with fixture data.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Response bodies captured into errors are truncated past this point.
const MAX_CAPTURED_BODY: usize = 4096;

/// Header carrying the upstream request id, when present.
const REQUEST_ID_HEADERS: [&str; 2] = ["x-zotero-requestid", "x-zotero-request-id"];

/// Closed set of failure kinds surfaced by the upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 401/403, or missing credentials before any call is made.
    Auth,
    /// HTTP 404.
    NotFound,
    /// HTTP 429.
    RateLimited,
    /// HTTP 400/409/412/413/415/422, or a local precondition failure.
    Validation,
    /// HTTP 5xx and any unexpected status.
    Upstream,
    /// Transport-level failure: connect, DNS, timeout. No response was seen.
    UpstreamUnavailable,
    /// A collection name matched more than one collection.
    AmbiguousCollection,
}

impl ErrorKind {
    /// The externally documented error code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Auth => "ZOTERO_AUTH_ERROR",
            ErrorKind::NotFound => "ZOTERO_NOT_FOUND",
            ErrorKind::RateLimited => "ZOTERO_RATE_LIMITED",
            ErrorKind::Validation => "ZOTERO_VALIDATION_ERROR",
            ErrorKind::Upstream => "ZOTERO_UPSTREAM_ERROR",
            ErrorKind::UpstreamUnavailable => "ZOTERO_UPSTREAM_UNAVAILABLE",
            ErrorKind::AmbiguousCollection => "ZOTERO_AMBIGUOUS_COLLECTION",
        }
    }

    /// Whether the executor may retry a request that failed with this kind.
    ///
    /// Auth, not-found, and validation failures are never retried: replaying
    /// a malformed or unauthorized request cannot succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Upstream | ErrorKind::UpstreamUnavailable
        )
    }
}

/// Normalized error returned from every client operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ZoteroError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub request_id: Option<String>,
    pub raw_body: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ZoteroError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            retry_after: None,
            request_id: None,
            raw_body: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Attach a structured detail to the error, keeping earlier values.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.entry(key.to_string()).or_insert(value.into());
        self
    }

    /// The details object exposed in tool envelopes: explicit details merged
    /// with the status, retry hint, and request id when known.
    pub fn details_json(&self) -> serde_json::Value {
        let mut map = self.details.clone();
        if let Some(status) = self.http_status {
            map.entry("status".to_string()).or_insert(status.into());
        }
        if let Some(retry_after) = self.retry_after {
            map.entry("retry_after_secs".to_string())
                .or_insert(retry_after.as_secs_f64().into());
        }
        if let Some(ref request_id) = self.request_id {
            map.entry("request_id".to_string())
                .or_insert(request_id.clone().into());
        }
        if let Some(ref body) = self.raw_body {
            map.entry("body".to_string()).or_insert(body.clone().into());
        }
        serde_json::Value::Object(map)
    }
}

/// Classify a non-2xx HTTP response into a [`ZoteroError`].
///
/// `headers` must use lowercased names. `now` anchors HTTP-date `Retry-After`
/// values so classification stays deterministic under test.
pub fn classify_status(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
    now: DateTime<Utc>,
) -> ZoteroError {
    let (kind, message) = match status {
        401 | 403 => (ErrorKind::Auth, "Zotero authentication failed."),
        404 => (ErrorKind::NotFound, "Zotero resource not found."),
        429 => (ErrorKind::RateLimited, "Zotero rate limit exceeded."),
        400 | 409 | 412 | 413 | 415 | 422 => {
            (ErrorKind::Validation, "Zotero rejected the request.")
        }
        500..=599 => (ErrorKind::Upstream, "Zotero service error."),
        _ => (ErrorKind::Upstream, "Zotero request failed."),
    };

    let mut error = ZoteroError::new(kind, message);
    error.http_status = Some(status);
    error.retry_after = headers
        .get("retry-after")
        .and_then(|value| parse_retry_after(value, now));
    error.request_id = REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .map(|value| value.to_string());
    if !body.is_empty() {
        let mut captured = body.to_string();
        if captured.len() > MAX_CAPTURED_BODY {
            let mut end = MAX_CAPTURED_BODY;
            while !captured.is_char_boundary(end) {
                end -= 1;
            }
            captured.truncate(end);
        }
        error.raw_body = Some(captured);
    }
    error
}

/// Parse a `Retry-After` header value: whole/fractional seconds, or an
/// HTTP-date in the future relative to `now`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(seconds) = text.parse::<f64>() {
        if seconds < 0.0 || !seconds.is_finite() {
            return None;
        }
        return Some(Duration::from_secs_f64(seconds));
    }
    let date = DateTime::parse_from_rfc2822(text).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(Duration::from_secs_f64(delta.num_milliseconds().max(0) as f64 / 1000.0))
}
