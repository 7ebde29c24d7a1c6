//! # Retry Policy
//!
//! Pure retry arithmetic: whether to try again, and how long to wait.
//!
//! ```text
//! attempt:   0      1      2      3 ...
//! delay:    1s  →  2s  →  4s  →  8s ... capped at 30s
//!           (+ up to 10% jitter of the exponential term)
//! ```
//!
//! The async executor that actually sleeps lives in `beacon-sync::retry`.

use std::time::Duration;

use rand::Rng;

use crate::classify::{classify, FailureKind};

/// Default number of attempts for API calls and batch writes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Fraction of the exponential term added as random jitter.
pub const DEFAULT_JITTER_RATIO: f64 = 0.10;

/// Retry decision: retryable and still under the attempt budget.
///
/// `attempt` counts attempts already made.
pub fn should_retry(kind: &FailureKind, attempt: u32, max_attempts: u32) -> bool {
    classify(kind).retryable && attempt < max_attempts
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// See [`should_retry`].
    pub fn should_retry(&self, kind: &FailureKind, attempt: u32) -> bool {
        should_retry(kind, attempt, self.max_attempts)
    }

    /// Delay before retrying after `attempt`, with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let fraction = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter_ratio)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, fraction)
    }

    /// Deterministic form of [`RetryPolicy::delay`].
    ///
    /// ## Arguments
    /// * `attempt` - zero-based retry index
    /// * `jitter_fraction` - share of the exponential term to add (clamped to `0..=jitter_ratio`)
    pub fn delay_with_jitter(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;

        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential = base_ms.saturating_mul(factor);
        let fraction = jitter_fraction.clamp(0.0, self.jitter_ratio.max(0.0));
        let jitter = (exponential.min(cap_ms) as f64 * fraction) as u64;

        Duration::from_millis(exponential.saturating_add(jitter).min(cap_ms))
    }
}
