//! HTTP transport seam for the request executor.
//!
//! The executor talks to the network through the [`Transport`] trait so the
//! retry, cache, and upload logic can be exercised against scripted fakes.
//! [`HttpTransport`] is the reqwest-backed production implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use zotero_mcp_core::error::ZoteroError;

/// One outbound HTTP request, fully resolved to an absolute URL.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(RequestBody::Json(body)),
        }
    }

    pub fn post_bytes(
        url: impl Into<String>,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(RequestBody::Bytes {
                bytes,
                content_type,
            }),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cache key of the logical read this request performs.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Raw response: status, lowercased headers, body bytes.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON; an empty body parses as `null`.
    pub fn json(&self) -> Result<serde_json::Value, ZoteroError> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|error| {
            ZoteroError::upstream("Unexpected Zotero response format.")
                .with_detail("status", self.status)
                .with_detail("parse_error", error.to_string())
        })
    }
}

/// A failure that produced no HTTP response: connect, DNS, timeout.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, spec: &RequestSpec) -> Result<RawResponse, TransportError>;
}

/// Production transport over a pooled reqwest client with a per-request
/// timeout.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ZoteroError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                ZoteroError::unavailable(format!("Failed to build HTTP client: {error}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, spec: &RequestSpec) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(spec.method.clone(), &spec.url);
        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }
        match &spec.body {
            Some(RequestBody::Json(value)) => {
                builder = builder.json(value);
            }
            Some(RequestBody::Bytes {
                bytes,
                content_type,
            }) => {
                if let Some(content_type) = content_type {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                builder = builder.body(bytes.clone());
            }
            None => {}
        }

        let response = builder.send().await.map_err(|error| TransportError {
            timed_out: error.is_timeout(),
            message: error.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|error| TransportError {
                timed_out: error.is_timeout(),
                message: error.to_string(),
            })?
            .to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
