//! reqwest-backed transport.

use async_trait::async_trait;
use std::fmt;

use super::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Transport that POSTs the JSON payload with reqwest.
///
/// Timeouts are enforced by the resilient client per attempt, so the
/// underlying reqwest client is built without one.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestClient").finish_non_exhaustive()
    }
}

impl ReqwestClient {
    /// Build a transport with a fresh connection pool.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let body = serde_json::to_vec(&request.payload)
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        let mut builder = self.client.post(&request.url).body(body);
        // SECURITY: credential headers are exposed only here, while writing the request
        for (name, value) in request.header_pairs() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;

        Ok(HttpResponse { status, body })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

fn map_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut
    } else {
        // Keep the full chain so connectivity patterns (dns, reset, refused) stay visible
        let mut description = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        TransportError::Failed(description)
    }
}
