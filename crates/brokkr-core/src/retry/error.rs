//! Error returned when a retried operation gives up

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Why a retried operation stopped without success
///
/// Generic over `E`, the error type of the operation being retried.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt allowed by the policy failed
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// The error from the final attempt
        source: E,
        /// Time spent across all attempts, delays included
        total_duration: Duration,
    },

    /// The predicate classified the error as permanent
    NonRetryable {
        /// Attempt on which the permanent error occurred
        attempt: u32,
        /// The permanent error
        source: E,
    },

    /// The policy allowed no attempts at all
    NoAttempts,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                source,
                total_duration,
            } => write!(
                f,
                "gave up after {} attempts over {:.1}s: {}",
                attempts,
                total_duration.as_secs_f64(),
                source
            ),
            RetryError::NonRetryable { attempt, source } => {
                write!(f, "non-retryable error on attempt {}: {}", attempt, source)
            }
            RetryError::NoAttempts => write!(f, "retry policy allows zero attempts"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source, .. } => {
                Some(source)
            }
            RetryError::NoAttempts => None,
        }
    }
}

impl<E> RetryError<E> {
    /// Number of attempts made before stopping
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
            RetryError::NoAttempts => 0,
        }
    }

    /// Check if all attempts were used up
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// Check if the error was classified permanent
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, RetryError::NonRetryable { .. })
    }

    /// Take the last underlying error
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source, .. } => {
                Some(source)
            }
            RetryError::NoAttempts => None,
        }
    }

    /// Borrow the last underlying error
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source, .. } => {
                Some(source)
            }
            RetryError::NoAttempts => None,
        }
    }
}
