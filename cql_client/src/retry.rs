//! Policies deciding whether a failed dispatch is attempted again.

use std::{fmt::Debug, num::NonZeroU32, time::Duration};

use crate::dispatch::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Dispatch again after waiting `delay`
    Retry { delay: Duration },
    DontRetry,
}

pub trait RetryPolicy: Debug + Send + Sync + 'static {
    /// Decide what to do after dispatch number `attempt` (starting at 1) failed with `error`
    fn decide(&self, attempt: u32, error: &DispatchError, idempotent: bool) -> RetryDecision;
}

/// Retries transient failures up to a bounded number of attempts, backing off exponentially
///
/// Non-idempotent requests are only retried when the server certainly did not apply them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRetryPolicy {
    max_attempts: NonZeroU32,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl DefaultRetryPolicy {
    pub fn new(max_attempts: NonZeroU32, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    /// The wait after failed attempt number `attempt`: `min_backoff * 2^(attempt - 1)`,
    /// capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.min_backoff
            .checked_mul(1 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(
            NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn decide(&self, attempt: u32, error: &DispatchError, idempotent: bool) -> RetryDecision {
        if attempt >= self.max_attempts.get() || !error.is_transient() {
            return RetryDecision::DontRetry;
        }
        if !idempotent && !error.is_certainly_not_applied() {
            return RetryDecision::DontRetry;
        }
        RetryDecision::Retry {
            delay: self.backoff(attempt),
        }
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn decide(&self, _attempt: u32, _error: &DispatchError, _idempotent: bool) -> RetryDecision {
        RetryDecision::DontRetry
    }
}
