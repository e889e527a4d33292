//! Attempt state machine.
//!
//! Each attempt of a logical operation ends in one of three tagged outcomes.
//! The retry loop consumes them directly instead of branching on error
//! unwinding:
//!
//! ```text
//! Attempting ──ok──────────────────▶ Success
//!     │
//!     ├─err, retryable, attempts left ─▶ Retrying{delay} ──▶ Attempting
//!     │
//!     └─err, terminal or exhausted ───▶ Failed
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::failure::Retryable;

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T, E> {
    /// The attempt produced a value; no further attempts.
    Success(T),

    /// The attempt failed but may be retried after `delay`.
    Retry { delay: Duration, error: E },

    /// The attempt failed and no retry will follow.
    Terminal(E),
}

impl<T, E: Retryable> AttemptOutcome<T, E> {
    /// Classify the raw result of attempt number `attempt` under `policy`.
    pub fn classify(policy: &BackoffPolicy, attempt: u32, result: Result<T, E>) -> Self {
        let error = match result {
            Ok(value) => return Self::Success(value),
            Err(error) => error,
        };

        match error.failure_class() {
            Some(class) => match policy.next(class, attempt) {
                Backoff::Retry(delay) => Self::Retry { delay, error },
                Backoff::Exhausted => Self::Terminal(error),
            },
            None => Self::Terminal(error),
        }
    }
}

impl<T, E> AttemptOutcome<T, E> {
    /// The kind of this outcome, without its payload.
    pub fn kind(&self) -> AttemptKind {
        match self {
            Self::Success(_) => AttemptKind::Success,
            Self::Retry { .. } => AttemptKind::Retryable,
            Self::Terminal(_) => AttemptKind::Terminal,
        }
    }

    /// Delay before the next attempt, if one follows.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    /// Summarize this outcome as the record of attempt number `attempt`.
    pub fn record(&self, attempt: u32) -> AttemptRecord {
        AttemptRecord {
            attempt,
            kind: self.kind(),
            delay: self.delay(),
        }
    }
}

/// Payload-free outcome kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Success,
    Retryable,
    Terminal,
}

/// What happened on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,

    /// How the attempt ended
    pub kind: AttemptKind,

    /// Sleep scheduled before the next attempt
    #[serde(rename = "delay_ms", default, with = "crate::config::opt_duration_ms")]
    pub delay: Option<Duration>,
}
