//! Backoff delay calculation and retry predicates

use crate::types::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Delay to wait after the given (1-indexed) failed attempt
///
/// The delay is capped at `policy.max_delay_ms` before jitter. Jitter adds up
/// to 25% on top of the capped value.
///
/// ```rust
/// use brokkr_core::retry::calculate_delay;
/// use brokkr_core::types::{RetryPolicy, RetryStrategy};
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     strategy: RetryStrategy::ExponentialBackoff,
///     backoff_multiplier: 2.0,
///     initial_delay_ms: 100,
///     max_delay_ms: 1000,
/// };
///
/// assert_eq!(calculate_delay(&policy, 1, false).as_millis(), 100);
/// assert_eq!(calculate_delay(&policy, 3, false).as_millis(), 400);
/// assert_eq!(calculate_delay(&policy, 10, false).as_millis(), 1000);
/// ```
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32, jitter: bool) -> Duration {
    let index = attempt.saturating_sub(1);

    let base_ms = match policy.strategy {
        RetryStrategy::None => 0,
        RetryStrategy::FixedDelay => policy.initial_delay_ms,
        RetryStrategy::ExponentialBackoff => {
            let factor = policy.backoff_multiplier.powi(index.min(64) as i32);
            let raw = policy.initial_delay_ms as f64 * factor;
            if raw.is_finite() && raw < u64::MAX as f64 {
                raw as u64
            } else {
                u64::MAX
            }
        }
        RetryStrategy::LinearBackoff => policy
            .initial_delay_ms
            .saturating_mul(u64::from(index) + 1),
    };

    let capped_ms = base_ms.min(policy.max_delay_ms);

    let final_ms = if jitter && capped_ms > 0 {
        capped_ms + rand::thread_rng().gen_range(0..=capped_ms / 4)
    } else {
        capped_ms
    };

    Duration::from_millis(final_ms)
}

/// Decides whether an error deserves another attempt
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    /// Return true to retry
    fn should_retry(&self, error: &E) -> bool;
}

/// Retry every error
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// Retry nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E: ?Sized> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _error: &E) -> bool {
        false
    }
}

/// Predicate backed by a closure
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

/// Errors that may carry an HTTP status code
pub trait HttpStatusError {
    /// Status code, if the error came from an HTTP response
    fn status_code(&self) -> Option<u16>;
}

/// Retry transport errors and a fixed set of transient HTTP statuses
#[derive(Debug, Clone)]
pub struct HttpStatusPredicate {
    retryable_codes: Vec<u16>,
}

impl HttpStatusPredicate {
    /// 408, 425, 429, 500, 502, 503, 504
    pub fn default_http() -> Self {
        Self {
            retryable_codes: vec![408, 425, 429, 500, 502, 503, 504],
        }
    }

    pub fn with_codes(codes: Vec<u16>) -> Self {
        Self {
            retryable_codes: codes,
        }
    }

    pub fn is_retryable_code(&self, code: u16) -> bool {
        self.retryable_codes.contains(&code)
    }
}

impl Default for HttpStatusPredicate {
    fn default() -> Self {
        Self::default_http()
    }
}

impl<E: HttpStatusError> RetryPredicate<E> for HttpStatusPredicate {
    fn should_retry(&self, error: &E) -> bool {
        // no status means the request never got a response
        error
            .status_code()
            .map(|code| self.is_retryable_code(code))
            .unwrap_or(true)
    }
}
