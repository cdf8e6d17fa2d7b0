//! Retry execution engine with policy-based configuration
//!
//! Used for the provider readiness poll and the SSH reachability probe.
//!
//! - Strategies: none, fixed, exponential, linear backoff, all capped
//! - Optional jitter (up to 25%)
//! - Predicates decide whether an error is worth another attempt
//! - Observers receive attempt events; `TracingObserver` logs them
//!
//! # Example
//!
//! ```rust,no_run
//! use brokkr_core::retry::{RetryExecutorBuilder, TracingObserver};
//! use brokkr_core::types::RetryPolicy;
//!
//! async fn example() {
//!     let executor = RetryExecutorBuilder::new()
//!         .with_policy(RetryPolicy::default())
//!         .with_observer(TracingObserver::new("fetch"))
//!         .build();
//!
//!     let _ = executor
//!         .execute(|| async { Ok::<_, std::io::Error>("done") })
//!         .await;
//! }
//! ```

mod error;
mod executor;
mod observer;
mod strategies;

pub use error::RetryError;
pub use executor::{retry_with_policy, RetryExecutor, RetryExecutorBuilder};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use strategies::{
    calculate_delay, AlwaysRetry, ClosurePredicate, HttpStatusError, HttpStatusPredicate,
    NeverRetry, RetryPredicate,
};
