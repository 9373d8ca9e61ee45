//! The resilient request executor.
//!
//! One `ZoteroClient` is constructed per process and passed by reference
//! into every tool handler. `execute` turns a logical call into one or more
//! physical attempts: cache-first for idempotent reads, classified failures,
//! and backoff-paced retries for transient error kinds only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use zotero_mcp_core::backoff::RetryPolicy;
use zotero_mcp_core::error::{classify_status, ZoteroError};
use zotero_mcp_core::events::ClientEvent;

use super::cache::{CacheConfig, ReadCache};
use super::transport::{
    HttpTransport, RawResponse, RequestSpec, Transport, TransportError,
};
use super::{CallContext, ZoteroConfig};

pub struct ZoteroClient {
    config: ZoteroConfig,
    retry: RetryPolicy,
    cache: ReadCache,
    upload_max_bytes: u64,
    transport: Arc<dyn Transport>,
}

impl ZoteroClient {
    /// Build the production client from environment configuration.
    pub fn from_env() -> Result<Self, ZoteroError> {
        let config = ZoteroConfig::from_env()?;
        let retry = super::retry_policy_from_env();
        let cache = super::cache_config_from_env();
        let upload_max_bytes = super::upload_max_bytes_from_env();
        let timeout = super::http_timeout_from_env();
        Self::new(config, retry, cache, upload_max_bytes, timeout)
    }

    pub fn new(
        config: ZoteroConfig,
        retry: RetryPolicy,
        cache: CacheConfig,
        upload_max_bytes: u64,
        timeout: Duration,
    ) -> Result<Self, ZoteroError> {
        let transport = Arc::new(HttpTransport::new(timeout)?);
        Ok(Self::with_transport(
            config,
            retry,
            cache,
            upload_max_bytes,
            transport,
        ))
    }

    /// Inject a custom transport. This is the seam the tests use.
    pub fn with_transport(
        config: ZoteroConfig,
        retry: RetryPolicy,
        cache: CacheConfig,
        upload_max_bytes: u64,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            retry: retry.sanitized(),
            cache: ReadCache::new(cache),
            upload_max_bytes,
            transport,
        }
    }

    pub fn upload_max_bytes(&self) -> u64 {
        self.upload_max_bytes
    }

    // --- Request builders ---

    /// Absolute URL under the authenticated user's prefix. Dynamic path
    /// segments in `rest` must already be percent-encoded.
    pub fn users_url(&self, rest: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.config.api_base,
            super::encode_path(&self.config.user_id),
            rest
        )
    }

    /// Absolute URL for endpoints outside the user prefix (e.g. templates).
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    /// Authenticated GET against the API.
    pub fn api_get(&self, url: String, query: &[(&str, String)]) -> RequestSpec {
        let url = if query.is_empty() {
            url
        } else {
            format!("{url}?{}", build_query(query))
        };
        self.authenticate(RequestSpec::get(url))
    }

    /// Authenticated JSON POST against the API.
    pub fn api_post(&self, url: String, body: serde_json::Value) -> RequestSpec {
        self.authenticate(RequestSpec::post_json(url, body))
    }

    /// Unauthenticated GET against an external URL (downloads, arXiv).
    pub fn external_get(&self, url: String) -> RequestSpec {
        RequestSpec::get(url).with_header("User-Agent", "zotero-mcp")
    }

    fn authenticate(&self, spec: RequestSpec) -> RequestSpec {
        spec.with_header("Zotero-API-Key", self.config.api_key.clone())
            .with_header("Zotero-API-Version", "3")
    }

    // --- Execution ---

    /// Execute a logical call: cache lookup, one or more attempts, retries
    /// paced by the backoff policy with the server's hint taking precedence.
    pub async fn execute(
        &self,
        spec: RequestSpec,
        ctx: &CallContext,
        cacheable: bool,
    ) -> Result<RawResponse, ZoteroError> {
        // Only pure reads are ever cached, whatever the caller claims.
        let cacheable = cacheable && spec.method == reqwest::Method::GET && spec.body.is_none();
        let key = spec.cache_key();
        if cacheable && self.cache.enabled() {
            if let Some(hit) = self.cache.get(&key) {
                ClientEvent::CacheHit {
                    correlation_id: &ctx.correlation_id,
                    key: &key,
                }
                .emit();
                return Ok(hit);
            }
            ClientEvent::CacheMiss {
                correlation_id: &ctx.correlation_id,
                key: &key,
            }
            .emit();
        }

        let max_attempts = self.retry.max_attempts;
        let mut server_hint: Option<Duration> = None;
        let mut pending: Option<ZoteroError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let hint = server_hint.take();
                let mut delay = self.retry.next_delay(attempt - 2, hint);
                if hint.is_none() {
                    delay = apply_jitter(delay, self.retry.max_delay);
                }
                if let Some(ref error) = pending {
                    ClientEvent::RetryAttempt {
                        correlation_id: &ctx.correlation_id,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        kind: error.kind.code(),
                    }
                    .emit();
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let started = tokio::time::Instant::now();
            let outcome = self.transport.send(&spec).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let status = outcome.as_ref().ok().map(|response| response.status);
            ClientEvent::Request {
                correlation_id: &ctx.correlation_id,
                method: spec.method.as_str(),
                url: &spec.url,
                status,
                attempt,
                duration_ms,
            }
            .emit();

            match outcome {
                Ok(response) if response.is_success() => {
                    if cacheable {
                        self.cache.put(&key, response.clone());
                    } else if spec.method != reqwest::Method::GET {
                        // A write makes any cached read of the same URL stale.
                        self.cache
                            .invalidate(&format!("{} {}", reqwest::Method::GET, spec.url));
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let error =
                        classify_status(response.status, &response.headers, &response.text(), Utc::now());
                    if error.kind.is_retryable() && attempt < max_attempts {
                        server_hint = error.retry_after;
                        pending = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(failure) => {
                    let error = classify_transport(&failure);
                    if attempt < max_attempts {
                        pending = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        Err(pending.unwrap_or_else(|| ZoteroError::unavailable("Zotero request failed.")))
    }

    /// Execute and parse the body as JSON, returning the response headers
    /// alongside for pagination.
    pub async fn execute_json(
        &self,
        spec: RequestSpec,
        ctx: &CallContext,
        cacheable: bool,
    ) -> Result<(serde_json::Value, HashMap<String, String>), ZoteroError> {
        let response = self.execute(spec, ctx, cacheable).await?;
        let value = response.json()?;
        Ok((value, response.headers))
    }

    /// Execute a one-time upload transfer. The authorization token is
    /// single-use, so an HTTP error response is surfaced immediately; only
    /// transport failures (which never reached the target) are retried.
    pub async fn execute_transfer(
        &self,
        spec: RequestSpec,
        ctx: &CallContext,
    ) -> Result<RawResponse, ZoteroError> {
        let max_attempts = self.retry.max_attempts;
        let mut pending: Option<ZoteroError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = apply_jitter(self.retry.next_delay(attempt - 2, None), self.retry.max_delay);
                if let Some(ref error) = pending {
                    ClientEvent::RetryAttempt {
                        correlation_id: &ctx.correlation_id,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        kind: error.kind.code(),
                    }
                    .emit();
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let started = tokio::time::Instant::now();
            let outcome = self.transport.send(&spec).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let status = outcome.as_ref().ok().map(|response| response.status);
            ClientEvent::Request {
                correlation_id: &ctx.correlation_id,
                method: spec.method.as_str(),
                url: &spec.url,
                status,
                attempt,
                duration_ms,
            }
            .emit();

            match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    return Err(classify_status(
                        response.status,
                        &response.headers,
                        &response.text(),
                        Utc::now(),
                    ));
                }
                Err(failure) => {
                    let error = classify_transport(&failure);
                    if attempt < max_attempts {
                        pending = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        Err(pending.unwrap_or_else(|| ZoteroError::unavailable("Upload transfer failed.")))
    }
}

/// Map a transport failure onto the taxonomy: no response was seen, so the
/// upstream is unavailable as far as this attempt is concerned.
fn classify_transport(failure: &TransportError) -> ZoteroError {
    let message = if failure.timed_out {
        "Zotero request timed out."
    } else {
        "Zotero is unreachable."
    };
    ZoteroError::unavailable(message).with_detail("reason", failure.message.clone())
}

/// Spread retries out a little without ever exceeding the ceiling.
fn apply_jitter(delay: Duration, max_delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..0.2));
    (delay + jitter).min(max_delay)
}

fn build_query(query: &[(&str, String)]) -> String {
    query
        .iter()
        .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::zotero::transport::testing::{
        json_response, response_with_headers, transport_failure, FakeTransport,
    };
    use serde_json::json;
    use zotero_mcp_core::error::ErrorKind;

    pub(crate) fn test_config() -> ZoteroConfig {
        ZoteroConfig {
            api_key: "test-key".to_string(),
            user_id: "12345".to_string(),
            api_base: "https://example.test".to_string(),
        }
    }

    pub(crate) fn test_client(
        outcomes: Vec<Result<RawResponse, TransportError>>,
        cache: CacheConfig,
    ) -> (ZoteroClient, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new(outcomes));
        let client = ZoteroClient::with_transport(
            test_config(),
            RetryPolicy::default(),
            cache,
            zotero_mcp_core::upload::DEFAULT_UPLOAD_MAX_BYTES,
            transport.clone(),
        );
        (client, transport)
    }

    fn no_cache() -> CacheConfig {
        CacheConfig::default()
    }

    fn enabled_cache() -> CacheConfig {
        CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_transient_failures_exhaust_the_budget() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(503, json!({}))),
                Ok(json_response(503, json!({}))),
                Ok(json_response(503, json!({}))),
                // A success is scripted but must never be reached.
                Ok(json_response(200, json!([]))),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = client.api_get(client.users_url("items"), &[]);

        let error = client.execute(spec, &ctx, false).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Upstream);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failure() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(503, json!({}))),
                Ok(json_response(200, json!([{"key": "A1"}]))),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = client.api_get(client.users_url("items"), &[]);

        let response = client.execute(spec, &ctx, false).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_exactly_the_server_hint() {
        let (client, transport) = test_client(
            vec![
                Ok(response_with_headers(429, &[("retry-after", "2")], json!({}))),
                Ok(json_response(200, json!([]))),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = client.api_get(client.users_url("items"), &[]);

        client.execute(spec, &ctx, false).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_never_retried() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(401, json!({}))),
                Ok(json_response(200, json!([]))),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = client.api_get(client.users_url("items"), &[]);

        let error = client.execute(spec, &ctx, false).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Auth);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_and_not_found_fail_fast() {
        for (status, kind) in [(400, ErrorKind::Validation), (404, ErrorKind::NotFound)] {
            let (client, transport) =
                test_client(vec![Ok(json_response(status, json!({})))], no_cache());
            let ctx = CallContext::new();
            let spec = client.api_get(client.users_url("items"), &[]);

            let error = client.execute(spec, &ctx, false).await.unwrap_err();
            assert_eq!(error.kind, kind);
            assert_eq!(transport.call_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_then_surface_unavailable() {
        let (client, transport) = test_client(
            vec![
                Err(transport_failure("connection refused")),
                Err(transport_failure("connection refused")),
                Err(transport_failure("connection refused")),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = client.api_get(client.users_url("items"), &[]);

        let error = client.execute(spec, &ctx, false).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cacheable_reads_are_served_from_cache() {
        let (client, transport) = test_client(
            vec![Ok(json_response(200, json!([{"key": "A1"}])))],
            enabled_cache(),
        );
        let ctx = CallContext::new();

        let first = client
            .execute(client.api_get(client.users_url("items"), &[]), &ctx, true)
            .await
            .unwrap();
        let second = client
            .execute(client.api_get(client.users_url("items"), &[]), &ctx, true)
            .await
            .unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mutating_calls_are_never_cached() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(200, json!({"successful": {}}))),
                Ok(json_response(200, json!({"successful": {}}))),
            ],
            enabled_cache(),
        );
        let ctx = CallContext::new();

        for _ in 0..2 {
            let spec = client.api_post(client.users_url("items"), json!([{}]));
            // Even a caller that wrongly claims cacheability gets no caching.
            client.execute(spec, &ctx, true).await.unwrap();
        }
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_cache_only_changes_call_volume() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(200, json!([]))),
                Ok(json_response(200, json!([]))),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();

        for _ in 0..2 {
            let spec = client.api_get(client.users_url("items"), &[]);
            let response = client.execute(spec, &ctx, true).await.unwrap();
            assert_eq!(response.status, 200);
        }
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_for_one_key_leave_a_valid_entry() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(200, json!(["first"]))),
                Ok(json_response(200, json!(["second"]))),
            ],
            enabled_cache(),
        );
        let client = Arc::new(client);
        let ctx = CallContext::new();

        let left = {
            let client = client.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let spec = client.api_get(client.users_url("items"), &[]);
                client.execute(spec, &ctx, true).await
            })
        };
        let right = {
            let client = client.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let spec = client.api_get(client.users_url("items"), &[]);
                client.execute(spec, &ctx, true).await
            })
        };
        let (left, right) = tokio::join!(left, right);
        left.unwrap().unwrap();
        right.unwrap().unwrap();

        let cached = client
            .execute(client.api_get(client.users_url("items"), &[]), &ctx, true)
            .await
            .unwrap();
        let text = cached.text();
        assert!(text == "[\"first\"]" || text == "[\"second\"]");
        assert!(transport.call_count() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_surfaces_http_errors_without_retry() {
        let (client, transport) = test_client(
            vec![Ok(json_response(403, json!({})))],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = RequestSpec::post_bytes(
            "https://uploads.example.test/upload".to_string(),
            b"payload".to_vec(),
            None,
        );

        let error = client.execute_transfer(spec, &ctx).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Auth);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_retries_transport_failures() {
        let (client, transport) = test_client(
            vec![
                Err(transport_failure("reset by peer")),
                Ok(json_response(201, serde_json::Value::Null)),
            ],
            no_cache(),
        );
        let ctx = CallContext::new();
        let spec = RequestSpec::post_bytes(
            "https://uploads.example.test/upload".to_string(),
            b"payload".to_vec(),
            None,
        );

        let response = client.execute_transfer(spec, &ctx).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(transport.call_count(), 2);
    }
}
