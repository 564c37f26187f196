//! Retry policy for detail fetches.
//!
//! A failed fetch is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is worthwhile
//! and how long to back off. Delays grow exponentially, capped, with a
//! uniform random jitter drawn from `[0, base_delay)` so simultaneous
//! failures do not retry in lockstep.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::source::SourceError;

/// Default maximum attempts, including the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Classification of a fetch failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry: timeouts, 5xx, network failures.
    Transient,
    /// Will never succeed: the resource is gone or was never there.
    Permanent,
    /// The source is throttling us; retry with backoff.
    RateLimited,
}

/// Maps an adapter error onto its retry classification.
#[must_use]
pub fn classify(error: &SourceError) -> FailureType {
    match error {
        SourceError::NotFound(_) => FailureType::Permanent,
        SourceError::RateLimited(_) => FailureType::RateLimited,
        SourceError::Timeout(_) | SourceError::Transient { .. } => FailureType::Transient,
    }
}

/// Decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run attempt number `attempt`.
    Retry { delay: Duration, attempt: u32 },
    /// Stop; `permanent` distinguishes dead resources from an exhausted
    /// retry budget.
    GiveUp { permanent: bool },
}

/// Exponential backoff configuration.
///
/// Delay for the retry after attempt `n` (1-indexed) is
/// `min(base_delay * 2^(n-1), max_delay) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is clamped
    /// to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Custom attempt budget with default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Zero-delay variant for tests; retries are immediate.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides the fate of a fetch whose attempt number `attempt`
    /// (1-indexed) just failed with `failure_type`.
    #[must_use]
    pub fn decide(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::GiveUp { permanent: true };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "retry budget exhausted");
            return RetryDecision::GiveUp { permanent: false };
        }

        let delay = self.backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled_ms = base_ms.saturating_mul(1_u64 << exponent);
        let capped_ms = scaled_ms.min(self.max_delay.as_millis() as u64);

        Duration::from_millis(capped_ms) + self.jitter()
    }

    /// Uniform jitter in `[0, base_delay)`.
    fn jitter(&self) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..base_ms))
    }
}
