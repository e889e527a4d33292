//! Resilient request client.
//!
//! Executes one logical JSON request to completion or final failure. Every
//! attempt runs under its own timeout guard; failures are classified into
//! tagged [`AttemptOutcome`]s and the loop either sleeps on the matching
//! backoff curve or stops.
//!
//! ## Header precedence
//!
//! Default headers < provider tokens < caller headers.
//!
//! Tokens are spread over the alias headers in order. A single token is
//! therefore sent under every alias; with several tokens, aliases past the
//! last token repeat the first one.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use drover_core::{
    is_connectivity_failure, is_retryable_status, AttemptOutcome, AttemptRecord, BackoffPolicy,
    ConfigStore, FailureClass, Retryable,
};

use crate::tokens::{NoTokens, TokenProvider, DEFAULT_TOKEN_HEADERS};
use crate::transport::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Errors from the resilient client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid JSON response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("No attempt was issued (max_retry is 0)")]
    NoAttempt,
}

impl Retryable for RequestError {
    fn failure_class(&self) -> Option<FailureClass> {
        match self {
            RequestError::Status { status, .. } if is_retryable_status(*status) => {
                Some(FailureClass::RetryableStatus)
            }
            RequestError::Timeout(_) => Some(FailureClass::Transport),
            RequestError::Transport(description) if is_connectivity_failure(description) => {
                Some(FailureClass::Transport)
            }
            _ => None,
        }
    }
}

/// Everything needed to issue one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Target URL
    pub url: String,

    /// JSON payload
    #[serde(default)]
    pub payload: JsonValue,

    /// Extra headers; these win over defaults and tokens
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Create a descriptor with no extra headers.
    pub fn new(url: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            url: url.into(),
            payload,
            headers: BTreeMap::new(),
        }
    }

    /// Add an extra header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Executes requests with per-attempt timeouts and two-tier backoff.
pub struct ResilientClient {
    http: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    config: Arc<ConfigStore>,
    default_headers: BTreeMap<String, String>,
    token_headers: Vec<String>,
}

impl ResilientClient {
    /// Create a client over `http`, reading settings from `config`.
    pub fn new(http: Arc<dyn HttpClient>, config: Arc<ConfigStore>) -> Self {
        let default_headers = BTreeMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ]);

        Self {
            http,
            tokens: Arc::new(NoTokens),
            config,
            default_headers,
            token_headers: DEFAULT_TOKEN_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }

    /// Set the token provider.
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Replace the header aliases tokens are sent under.
    pub fn with_token_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.token_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Add or replace a default header.
    pub fn with_default_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Execute a request until it succeeds or fails terminally.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<JsonValue, RequestError> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute a request, giving up early when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, RequestError> {
        let mut history = Vec::new();
        self.drive(&request, cancel, &mut history).await
    }

    /// Execute a request and return the attempt history with the result.
    pub async fn execute_recorded(
        &self,
        request: RequestDescriptor,
    ) -> (Result<JsonValue, RequestError>, Vec<AttemptRecord>) {
        let mut history = Vec::new();
        let result = self
            .drive(&request, &CancellationToken::new(), &mut history)
            .await;
        (result, history)
    }

    /// The attempt loop.
    async fn drive(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        history: &mut Vec<AttemptRecord>,
    ) -> Result<JsonValue, RequestError> {
        let config = self.config.snapshot();
        let policy = BackoffPolicy::from_config(&config);
        let http_request = self.prepare(request);

        for attempt in 1..=policy.max_retry() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                result = self.attempt(&http_request, config.timeout) => result,
            };

            let outcome = AttemptOutcome::classify(&policy, attempt, result);
            history.push(outcome.record(attempt));

            match outcome {
                AttemptOutcome::Success(value) => {
                    tracing::debug!(url = %request.url, attempt, "Request succeeded");
                    return Ok(value);
                }
                AttemptOutcome::Retry { delay, error } => {
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        max_retry = policy.max_retry(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request attempt failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                AttemptOutcome::Terminal(error) => {
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        error = %error,
                        "Request failed"
                    );
                    return Err(error);
                }
            }
        }

        // Every branch above returns on the last attempt; reaching here means
        // the loop never ran.
        Err(RequestError::NoAttempt)
    }

    /// One attempt under the timeout guard.
    async fn attempt(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<JsonValue, RequestError> {
        let response = match tokio::time::timeout(timeout, self.http.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::TimedOut)) | Err(_) => {
                return Err(RequestError::Timeout(timeout))
            }
            Ok(Err(TransportError::Failed(description))) => {
                return Err(RequestError::Transport(description))
            }
        };

        if !response.is_success() {
            let HttpResponse { status, body } = response;
            return Err(RequestError::Status { status, body });
        }

        parse_body(&response.body)
    }

    /// Merge defaults, tokens and caller headers into a wire request.
    fn prepare(&self, request: &RequestDescriptor) -> HttpRequest {
        let mut http_request = HttpRequest::new(request.url.clone(), request.payload.clone());

        for (name, value) in &self.default_headers {
            http_request.set_header(name, value.clone());
        }

        match self.tokens.tokens() {
            // The n-th token goes under the n-th alias; leftover aliases get the first
            Ok(tokens) => {
                let present: Vec<_> = tokens.iter().filter(|t| !t.is_empty()).collect();
                if let Some(primary) = present.first() {
                    for (slot, alias) in self.token_headers.iter().enumerate() {
                        let token = present.get(slot).unwrap_or(primary);
                        let value = SecretString::from(token.expose().to_string());
                        http_request.set_secret_header(alias, value);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Token collection failed, sending without tokens");
            }
        }

        for (name, value) in &request.headers {
            http_request.set_header(name, value.clone());
        }

        http_request
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("http", &self.http.name())
            .field("default_headers", &self.default_headers)
            .field("token_headers", &self.token_headers)
            .finish()
    }
}

/// Parse a success body. An empty body reads as JSON `null`.
fn parse_body(body: &str) -> Result<JsonValue, RequestError> {
    if body.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(body).map_err(|e| RequestError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drover_core::{AttemptKind, ConfigPatch, PoolConfig};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    use crate::tokens::{HeaderToken, StaticTokens, TokenError};

    /// What the mock transport does on one attempt.
    #[derive(Clone)]
    enum Step {
        Respond(u16, &'static str),
        Fail(&'static str),
        Hang,
    }

    /// Scripted transport. The last step repeats once the script runs out.
    struct ScriptedClient {
        steps: Mutex<VecDeque<Step>>,
        last: Step,
        sent_at: Mutex<Vec<Instant>>,
        headers: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            let last = steps.last().cloned().unwrap_or(Step::Respond(200, "null"));
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                last,
                sent_at: Mutex::new(Vec::new()),
                headers: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> usize {
            self.sent_at.lock().len()
        }

        /// Gaps between consecutive attempt starts.
        fn gaps(&self) -> Vec<Duration> {
            let sent = self.sent_at.lock();
            sent.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent_at.lock().push(Instant::now());
            self.headers.lock().push(
                request
                    .header_pairs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            let step = self
                .steps
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.last.clone());
            match step {
                Step::Respond(status, body) => Ok(HttpResponse::new(status, body)),
                Step::Fail(description) => Err(TransportError::Failed(description.to_string())),
                Step::Hang => std::future::pending().await,
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn store(max_retry: u32) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(PoolConfig {
            max_retry,
            timeout: Duration::from_millis(1000),
            ..PoolConfig::default()
        }))
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::new("http://localhost/api/items", json!({"id": 1}))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// Assert each gap is at least `expected` and within jitter tolerance.
    fn assert_gaps(actual: &[Duration], expected: &[Duration]) {
        assert_eq!(actual.len(), expected.len(), "gaps: {actual:?}");
        for (gap, want) in actual.iter().zip(expected) {
            assert!(
                *gap >= *want && *gap < *want + ms(50),
                "gap {gap:?} != {want:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let http = ScriptedClient::new(vec![Step::Respond(200, r#"{"ok": true}"#)]);
        let client = ResilientClient::new(http.clone(), store(4));

        let value = client.execute(request()).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(http.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_500_exhausts_exactly_max_retry() {
        let http = ScriptedClient::new(vec![Step::Respond(500, "boom")]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(
            error,
            RequestError::Status {
                status: 500,
                body: "boom".to_string(),
            }
        );
        assert_eq!(http.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_429_backs_off_exponentially() {
        let http = ScriptedClient::new(vec![Step::Respond(429, "slow down")]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(error.to_string(), "HTTP 429: slow down");
        assert_eq!(http.attempts(), 4);
        assert_gaps(&http.gaps(), &[ms(200), ms(400), ms(800)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_three_500s_stops_at_fourth_attempt() {
        let http = ScriptedClient::new(vec![
            Step::Respond(500, "a"),
            Step::Respond(500, "b"),
            Step::Respond(500, "c"),
            Step::Respond(200, r#"{"id": 4}"#),
        ]);
        let client = ResilientClient::new(http.clone(), store(6));

        let (result, history) = client.execute_recorded(request()).await;
        assert_eq!(result.unwrap(), json!({"id": 4}));
        assert_eq!(http.attempts(), 4);
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].kind, AttemptKind::Success);
        for record in &history[..3] {
            assert_eq!(record.kind, AttemptKind::Retryable);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_target_times_out_with_linear_backoff() {
        let http = ScriptedClient::new(vec![Step::Hang]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(error, RequestError::Timeout(ms(1000)));
        assert_eq!(http.attempts(), 4);

        // Each gap is one timeout plus the linear backoff delay
        let backoff: Vec<_> = http.gaps().into_iter().map(|g| g - ms(1000)).collect();
        assert_gaps(&backoff, &[ms(300), ms(600), ms(900)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_failure_is_retried() {
        let http = ScriptedClient::new(vec![
            Step::Fail("connection reset by peer"),
            Step::Respond(200, "[1, 2]"),
        ]);
        let client = ResilientClient::new(http.clone(), store(4));

        let value = client.execute(request()).await.unwrap();
        assert_eq!(value, json!([1, 2]));
        assert_eq!(http.attempts(), 2);
        assert_gaps(&http.gaps(), &[ms(300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_failure_rethrown_when_exhausted() {
        let http = ScriptedClient::new(vec![Step::Fail("dns error: no such host")]);
        let client = ResilientClient::new(http.clone(), store(2));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(
            error,
            RequestError::Transport("dns error: no such host".to_string())
        );
        assert_eq!(http.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_transport_failure_is_terminal() {
        let http = ScriptedClient::new(vec![Step::Fail("invalid header value")]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert!(matches!(error, RequestError::Transport(_)));
        assert_eq!(http.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_status_is_terminal() {
        let http = ScriptedClient::new(vec![Step::Respond(404, "missing")]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(error.to_string(), "HTTP 404: missing");
        assert_eq!(http.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_json_is_terminal_decode_error() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "<html>")]);
        let client = ResilientClient::new(http.clone(), store(4));

        let error = client.execute(request()).await.unwrap_err();
        assert!(matches!(error, RequestError::Decode(_)));
        assert_eq!(http.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_success_body_is_null() {
        let http = ScriptedClient::new(vec![Step::Respond(204, "")]);
        let client = ResilientClient::new(http, store(4));

        assert_eq!(client.execute(request()).await.unwrap(), JsonValue::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retry_issues_no_attempt() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let client = ResilientClient::new(http.clone(), store(0));

        let error = client.execute(request()).await.unwrap_err();
        assert_eq!(error, RequestError::NoAttempt);
        assert_eq!(http.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_applies_to_next_execute() {
        let http = ScriptedClient::new(vec![Step::Respond(503, "down")]);
        let config = store(4);
        let client = ResilientClient::new(http.clone(), config.clone());

        config.set(ConfigPatch::new().max_retry(2));
        let _ = client.execute(request()).await;
        assert_eq!(http.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let http = ScriptedClient::new(vec![Step::Respond(503, "down")]);
        let client = ResilientClient::new(http.clone(), store(10));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(500)).await;
            trigger.cancel();
        });

        let error = client
            .execute_with_cancel(request(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(error, RequestError::Cancelled);
        // Attempts at 0ms and 200ms; the 400ms sleep is cut short
        assert_eq!(http.attempts(), 2);
    }

    /// Headers of the first attempt, credentials included.
    fn first_sent(http: &ScriptedClient) -> BTreeMap<String, String> {
        let headers = http.headers.lock();
        headers[0].iter().cloned().collect()
    }

    #[tokio::test]
    async fn test_headers_merge_defaults_tokens_and_caller() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let tokens = StaticTokens::new(["tok-primary", "tok-secondary"]);
        let client = ResilientClient::new(http.clone(), store(1))
            .with_tokens(Arc::new(tokens))
            .with_token_headers(["X-CSRF-Token", "X-XSRF-TOKEN"]);

        let descriptor = request()
            .with_header("X-XSRF-TOKEN", "caller-wins")
            .with_header("x-trace", "abc");
        client.execute(descriptor).await.unwrap();

        let sent = first_sent(&http);
        assert_eq!(sent["content-type"], "application/json");
        assert_eq!(sent["accept"], "application/json");
        assert_eq!(sent["x-csrf-token"], "tok-primary");
        assert_eq!(sent["x-xsrf-token"], "caller-wins");
        assert_eq!(sent["x-trace"], "abc");
    }

    #[tokio::test]
    async fn test_single_token_sent_under_every_default_alias() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let tokens = StaticTokens::new(["csrf-123"]);
        let client = ResilientClient::new(http.clone(), store(1)).with_tokens(Arc::new(tokens));

        client.execute(request()).await.unwrap();

        let sent = first_sent(&http);
        for alias in DEFAULT_TOKEN_HEADERS {
            assert_eq!(sent[*alias], "csrf-123", "{alias}");
        }
    }

    #[tokio::test]
    async fn test_tokens_spread_over_aliases_in_order() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let tokens = StaticTokens::new(["first", "", "second"]);
        let client = ResilientClient::new(http.clone(), store(1)).with_tokens(Arc::new(tokens));

        client.execute(request()).await.unwrap();

        // The empty token is skipped; the third alias falls back to the first token
        let sent = first_sent(&http);
        assert_eq!(sent["x-csrf-token"], "first");
        assert_eq!(sent["x-xsrf-token"], "second");
        assert_eq!(sent["csrf-token"], "first");
    }

    #[tokio::test]
    async fn test_default_headers_can_be_replaced_and_extended() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let client = ResilientClient::new(http.clone(), store(1))
            .with_default_header("Accept", "application/vnd.drover+json")
            .with_default_header("User-Agent", "drover-test");

        client.execute(request()).await.unwrap();

        let sent = first_sent(&http);
        assert_eq!(sent["accept"], "application/vnd.drover+json");
        assert_eq!(sent["user-agent"], "drover-test");
        assert_eq!(sent["content-type"], "application/json");
    }

    struct BrokenTokens;

    impl TokenProvider for BrokenTokens {
        fn tokens(&self) -> Result<Vec<HeaderToken>, TokenError> {
            Err(TokenError::Unavailable("page not loaded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_token_failure_is_swallowed() {
        let http = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let tokens = Arc::new(BrokenTokens);
        let client = ResilientClient::new(http.clone(), store(1)).with_tokens(tokens);

        assert!(client.execute(request()).await.is_ok());
        let sent = first_sent(&http);
        assert!(sent.keys().all(|name| !name.contains("csrf")));
    }

    #[test]
    fn test_descriptor_from_json_line() {
        let descriptor: RequestDescriptor = serde_json::from_str(
            r#"{"url": "http://localhost/a", "headers": {"x-trace": "1"}}"#,
        )
        .unwrap();
        assert_eq!(descriptor.payload, JsonValue::Null);
        assert_eq!(descriptor.headers["x-trace"], "1");
    }

    #[test]
    fn test_failure_classes() {
        let status = |status| RequestError::Status {
            status,
            body: String::new(),
        };
        let overloaded = Some(FailureClass::RetryableStatus);
        assert_eq!(status(429).failure_class(), overloaded);
        assert_eq!(status(502).failure_class(), overloaded);
        assert_eq!(status(401).failure_class(), None);
        assert_eq!(
            RequestError::Timeout(ms(10)).failure_class(),
            Some(FailureClass::Transport)
        );
        assert_eq!(RequestError::Decode("x".into()).failure_class(), None);
        assert_eq!(RequestError::Cancelled.failure_class(), None);
    }
}
