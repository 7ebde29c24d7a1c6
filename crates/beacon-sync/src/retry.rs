//! # Retry Executor
//!
//! Drives `backoff::future::retry_notify` with the classifier-aware
//! [`RetryPolicy`] from beacon-core.
//!
//! ```text
//!  attempt 1 ──fail(retryable)──► sleep delay(0) ──► attempt 2 ──fail──► sleep delay(1)
//!      │                                                                      │
//!      └──fail(non-retryable)──► return error                                 ▼
//!                                                               attempt 3 ──fail──► return error
//! ```
//!
//! Used at every external-call site and around every chunk write.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use beacon_core::{Classify, RetryPolicy};
use tracing::warn;

/// [`Backoff`] schedule backed by a [`RetryPolicy`].
///
/// Yields `max_attempts - 1` delays, then stops.
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    retries: u32,
}

impl PolicyBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        PolicyBackoff { policy, retries: 0 }
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Backoff for PolicyBackoff {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let attempts_made = self.retries + 1;
        if attempts_made >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay(self.retries);
        self.retries += 1;
        Some(delay)
    }
}

/// Runs `operation` until it succeeds, fails non-retryably, or the attempt
/// budget is spent.
///
/// Retryability comes from [`Classify::classification`]; each retry is
/// logged at `warn` with the operation label.
pub async fn retry_classified<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let mut attempt = 0u32;
    let max_attempts = policy.max_attempts;

    backoff::future::retry_notify(
        PolicyBackoff::new(policy),
        || {
            let call = operation();
            async move {
                call.await.map_err(|e| {
                    if e.classification().retryable {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |err: E, delay: Duration| {
            attempt += 1;
            warn!(
                operation = %label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                code = err.classification().code,
                "Retryable error, retrying: {}",
                err
            );
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_policy_backoff_yields_budget_minus_one() {
        let mut backoff = PolicyBackoff::new(RetryPolicy::default());
        let first = backoff.next_backoff().unwrap();
        let second = backoff.next_backoff().unwrap();
        assert!(first >= Duration::from_millis(1_000) && first <= Duration::from_millis(1_100));
        assert!(second >= Duration::from_millis(2_000) && second <= Duration::from_millis(2_200));
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert_eq!(backoff.retries(), 0);
        assert!(backoff.next_backoff().is_some());
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, ApiError> = retry_classified(fast_policy(), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ApiError::Status {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> = retry_classified(fast_policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Status {
                status: 404,
                message: "gone".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(ApiError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_total_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> = retry_classified(fast_policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Timeout)
        })
        .await;

        assert_eq!(result, Err(ApiError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let started = tokio::time::Instant::now();
        let policy = RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        };

        let _: Result<(), ApiError> =
            retry_classified(policy, "test", || async { Err(ApiError::Timeout) }).await;

        // 1s + 2s between three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3_000));
        assert!(elapsed < Duration::from_millis(3_100));
    }
}
