//! # drover-core
//!
//! Deterministic building blocks for the Drover task engine.
//!
//! This crate holds everything that can be decided without touching the
//! network or a clock:
//! - Pool configuration and its snapshot store
//! - The two-tier backoff policy
//! - Failure classification and the attempt state machine
//!
//! The async execution (request client, worker pool) lives in
//! `drover-runtime`, which consumes these types.
//!
//! ## Example
//!
//! ```rust
//! use drover_core::{Backoff, BackoffPolicy, FailureClass};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(4);
//! assert_eq!(
//!     policy.next(FailureClass::RetryableStatus, 1),
//!     Backoff::Retry(Duration::from_millis(200)),
//! );
//! assert_eq!(policy.next(FailureClass::Transport, 4), Backoff::Exhausted);
//! ```

pub mod attempt;
pub mod backoff;
pub mod config;
pub mod failure;

// Re-export main types at crate root
pub use attempt::{AttemptKind, AttemptOutcome, AttemptRecord};
pub use backoff::{is_retryable_status, Backoff, BackoffPolicy};
pub use config::{ConfigError, ConfigPatch, ConfigStore, PoolConfig};
pub use failure::{is_connectivity_failure, FailureClass, Retryable};
