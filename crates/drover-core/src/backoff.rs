//! Two-tier backoff policy.
//!
//! Status-level overload (429, 5xx) backs off exponentially from 200ms,
//! capped at 2s. Transport failures back off linearly in 300ms steps.
//! Once the attempt number reaches `max_retry` the policy reports
//! [`Backoff::Exhausted`] and the caller must surface a terminal failure.

use std::time::Duration;

use crate::config::PoolConfig;
use crate::failure::FailureClass;

/// First delay on the exponential (status) curve.
pub const STATUS_BASE_DELAY: Duration = Duration::from_millis(200);

/// Upper bound on the exponential (status) curve.
pub const STATUS_MAX_DELAY: Duration = Duration::from_millis(2000);

/// Step of the linear (transport) curve.
pub const TRANSPORT_STEP_DELAY: Duration = Duration::from_millis(300);

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Sleep for the given delay, then issue the next attempt.
    Retry(Duration),

    /// No attempts remain.
    Exhausted,
}

/// Pure mapping from (failure class, attempt) to the next backoff decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_retry: u32,
}

impl BackoffPolicy {
    /// Create a policy allowing at most `max_retry` attempts in total.
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }

    /// Create a policy from a configuration snapshot.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_retry)
    }

    /// Maximum number of attempts.
    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Decide what follows a failure of the given class on `attempt` (1-based).
    pub fn next(&self, class: FailureClass, attempt: u32) -> Backoff {
        if attempt >= self.max_retry {
            return Backoff::Exhausted;
        }
        Backoff::Retry(Self::delay(class, attempt))
    }

    /// Delay on the curve for `class` after `attempt`, ignoring exhaustion.
    pub fn delay(class: FailureClass, attempt: u32) -> Duration {
        match class {
            FailureClass::RetryableStatus => status_delay(attempt),
            FailureClass::Transport => transport_delay(attempt),
        }
    }
}

/// `min(2000, 200 * 2^(attempt-1))` milliseconds.
fn status_delay(attempt: u32) -> Duration {
    // 200 * 2^4 already exceeds the cap, so larger shifts are never needed
    let exponent = attempt.saturating_sub(1).min(4);
    let delay = STATUS_BASE_DELAY.saturating_mul(1u32 << exponent);
    delay.min(STATUS_MAX_DELAY)
}

/// `300 * attempt` milliseconds.
fn transport_delay(attempt: u32) -> Duration {
    TRANSPORT_STEP_DELAY.saturating_mul(attempt)
}

/// Whether an HTTP status signals overload worth retrying (429 or 5xx).
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_status_curve_is_exponential_and_capped() {
        let delays: Vec<_> = (1..=7)
            .map(|a| BackoffPolicy::delay(FailureClass::RetryableStatus, a))
            .collect();
        let expected = [200, 400, 800, 1600, 2000, 2000, 2000].map(ms);
        assert_eq!(delays, expected);
    }

    #[test]
    fn test_transport_curve_is_linear() {
        let delays: Vec<_> = (1..=4)
            .map(|a| BackoffPolicy::delay(FailureClass::Transport, a))
            .collect();
        assert_eq!(delays, vec![ms(300), ms(600), ms(900), ms(1200)]);
    }

    #[test]
    fn test_exhausted_at_max_retry() {
        let policy = BackoffPolicy::new(4);
        assert_eq!(
            policy.next(FailureClass::RetryableStatus, 3),
            Backoff::Retry(ms(800))
        );
        assert_eq!(
            policy.next(FailureClass::RetryableStatus, 4),
            Backoff::Exhausted
        );
        assert_eq!(policy.next(FailureClass::Transport, 4), Backoff::Exhausted);
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = BackoffPolicy::new(1);
        assert_eq!(policy.next(FailureClass::Transport, 1), Backoff::Exhausted);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(599));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(600));
    }

    proptest! {
        #[test]
        fn prop_status_delay_bounded(attempt in 1u32..10_000) {
            let delay = BackoffPolicy::delay(FailureClass::RetryableStatus, attempt);
            prop_assert!(delay >= STATUS_BASE_DELAY);
            prop_assert!(delay <= STATUS_MAX_DELAY);
        }

        #[test]
        fn prop_delays_never_shrink(attempt in 1u32..10_000) {
            for class in [FailureClass::RetryableStatus, FailureClass::Transport] {
                prop_assert!(
                    BackoffPolicy::delay(class, attempt + 1) >= BackoffPolicy::delay(class, attempt)
                );
            }
        }

        #[test]
        fn prop_retry_only_below_max(max_retry in 1u32..50, attempt in 1u32..60) {
            let policy = BackoffPolicy::new(max_retry);
            let decision = policy.next(FailureClass::Transport, attempt);
            if attempt < max_retry {
                prop_assert!(matches!(decision, Backoff::Retry(_)));
            } else {
                prop_assert_eq!(decision, Backoff::Exhausted);
            }
        }
    }
}
