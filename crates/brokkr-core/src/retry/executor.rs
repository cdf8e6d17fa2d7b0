//! Retry loop

use std::error::Error;
use std::future::Future;
use std::time::Instant;

use crate::types::RetryPolicy;

use super::error::RetryError;
use super::observer::{NoOpObserver, RetryObserver};
use super::strategies::{calculate_delay, AlwaysRetry, RetryPredicate};

/// Run `op` under `policy`, retrying every error
///
/// ```rust,no_run
/// use brokkr_core::retry::retry_with_policy;
/// use brokkr_core::types::RetryPolicy;
///
/// async fn example() {
///     let result = retry_with_policy(&RetryPolicy::default(), || async {
///         Ok::<_, std::io::Error>(42)
///     })
///     .await;
///     assert_eq!(result.unwrap(), 42);
/// }
/// ```
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + Send + 'static,
{
    RetryExecutorBuilder::new()
        .with_policy(policy.clone())
        .build()
        .execute(op)
        .await
}

/// Builder for [`RetryExecutor`]
///
/// Jitter is on by default.
pub struct RetryExecutorBuilder<P = AlwaysRetry, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
}

impl Default for RetryExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            predicate: AlwaysRetry,
            observer: NoOpObserver,
            jitter: true,
        }
    }
}

impl<P, O> RetryExecutorBuilder<P, O> {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutorBuilder<P2, O> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate,
            observer: self.observer,
            jitter: self.jitter,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutorBuilder<P, O2> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            jitter: self.jitter,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryExecutor<P, O> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer: self.observer,
            jitter: self.jitter,
        }
    }
}

/// Executes async operations under a retry policy
pub struct RetryExecutor<P, O> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
}

impl<P, O: RetryObserver> RetryExecutor<P, O> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, the predicate rejects its error, or the
    /// policy's attempts run out
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + Send + 'static,
        P: RetryPredicate<E>,
    {
        let max_attempts = self.policy.max_attempts;
        if max_attempts == 0 {
            return Err(RetryError::NoAttempts);
        }

        let start = Instant::now();
        let mut attempt = 1;

        loop {
            self.observer.on_attempt_start(attempt, max_attempts);

            let err = match op().await {
                Ok(value) => {
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_cancelled(attempt, &err);
                return Err(RetryError::NonRetryable {
                    attempt,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(attempt, &err);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: err,
                    total_duration: start.elapsed(),
                });
            }

            let delay = calculate_delay(&self.policy, attempt, self.jitter);
            self.observer.on_attempt_failed(attempt, &err, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
