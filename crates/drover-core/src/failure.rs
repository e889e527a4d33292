//! Failure classes and connectivity detection.
//!
//! A failure is either retryable under one of the two backoff curves, or it
//! is terminal. Errors opt into retrying by implementing [`Retryable`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Descriptions produced by transports when the peer could not be reached
    /// or the connection dropped mid-flight.
    static ref CONNECTIVITY_PATTERN: Regex = Regex::new(
        r"(?i)(network|failed to fetch|fetch failed|error sending request|connection (reset|refused|closed|aborted)|broken pipe|dns|name resolution|host unreachable|unexpected eof|timed? ?out|aborted)"
    ).unwrap();
}

/// Which backoff curve a retryable failure follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Server overload signal: HTTP 429 or any 5xx. Exponential curve.
    RetryableStatus,

    /// Timeout guard fired or the connection failed. Linear curve.
    Transport,
}

/// Errors that may be retried.
///
/// Returning `None` marks the error as terminal regardless of how many
/// attempts remain.
pub trait Retryable {
    /// The curve to back off on, or `None` for a terminal failure.
    fn failure_class(&self) -> Option<FailureClass>;
}

/// Check whether a transport failure description looks like a connectivity
/// problem (DNS, refused/reset connection, aborted fetch).
pub fn is_connectivity_failure(description: &str) -> bool {
    CONNECTIVITY_PATTERN.is_match(description)
}
