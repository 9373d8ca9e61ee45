//! Structured client events.
//!
//! Every observable step of the upstream client — cache lookups, retry
//! waits, upload protocol transitions, request outcomes — is emitted as one
//! JSON event tagged with the correlation id of the tool invocation that
//! caused it, so the full attempt sequence of a logical call can be
//! reconstructed from the log stream.
//!
//! Events never carry credential material, upload tokens, or file bytes.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ClientEvent<'a> {
    #[serde(rename = "cache.hit")]
    CacheHit { correlation_id: &'a str, key: &'a str },
    #[serde(rename = "cache.miss")]
    CacheMiss { correlation_id: &'a str, key: &'a str },
    #[serde(rename = "retry.attempt")]
    RetryAttempt {
        correlation_id: &'a str,
        attempt: u32,
        delay_ms: u64,
        kind: &'static str,
    },
    #[serde(rename = "upload.step")]
    UploadStep {
        correlation_id: &'a str,
        from_state: &'static str,
        to_state: &'static str,
    },
    #[serde(rename = "request")]
    Request {
        correlation_id: &'a str,
        method: &'a str,
        url: &'a str,
        status: Option<u16>,
        attempt: u32,
        duration_ms: u64,
    },
    #[serde(rename = "tool.call")]
    ToolCall { correlation_id: &'a str, tool: &'a str },
    #[serde(rename = "tool.completed")]
    ToolCompleted {
        correlation_id: &'a str,
        tool: &'a str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'a str>,
        duration_ms: u64,
    },
}

impl ClientEvent<'_> {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(target: "zotero_mcp", client_event = %json);
    }
}
