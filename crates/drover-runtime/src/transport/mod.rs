//! Transport abstraction for the request client.
//!
//! The client never talks to the network directly; it hands a fully
//! prepared [`HttpRequest`] to an [`HttpClient`] and gets back a status and
//! body, or a [`TransportError`]. Swapping the transport (reqwest, a test
//! double, a recorded fixture) does not change retry behaviour.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::ReqwestClient;

/// Errors raised by a transport before any response arrived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    TimedOut,

    #[error("{0}")]
    Failed(String),
}

/// A request ready to go on the wire.
///
/// Header names are lowercase. Credential headers are kept apart and only
/// exposed through [`HttpRequest::header_pairs`] at the point of use.
pub struct HttpRequest {
    /// Target URL
    pub url: String,

    /// JSON body
    pub payload: JsonValue,

    headers: BTreeMap<String, String>,
    secret_headers: BTreeMap<String, SecretString>,
}

impl HttpRequest {
    /// Create a request with no headers.
    pub fn new(url: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            url: url.into(),
            payload,
            headers: BTreeMap::new(),
            secret_headers: BTreeMap::new(),
        }
    }

    /// Set a plain header, replacing any header of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.secret_headers.remove(&name);
        self.headers.insert(name, value.into());
    }

    /// Set a credential header, replacing any header of the same name.
    pub fn set_secret_header(&mut self, name: &str, value: SecretString) {
        let name = name.to_ascii_lowercase();
        self.headers.remove(&name);
        self.secret_headers.insert(name, value);
    }

    /// Whether a header is present (plain or credential).
    pub fn has_header(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.headers.contains_key(&name) || self.secret_headers.contains_key(&name)
    }

    /// Value of a plain header. Credential headers are not returned.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers with credential values exposed.
    ///
    /// Only transports should call this, when writing the request.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(
                self.secret_headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.expose_secret())),
            )
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .secret_headers
            .keys()
            .map(|name| (name.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .field("secret_headers", &redacted)
            .finish()
    }
}

/// A response received from the transport, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,

    /// Raw response body
    pub body: String,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns whatever came back.
///
/// Implementations must not retry on their own; retries belong to the
/// resilient client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request once.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Transport name for logs.
    fn name(&self) -> &str;
}
