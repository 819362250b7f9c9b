//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! handler.rs execute(key, op):
//!     → dedupe.rs (replay a completed outcome inside the window)
//!     → rate_limit.rs (token bucket, checked once per call)
//!     → bulkhead.rs (bounded concurrency, reject when full)
//!     → circuit_breaker.rs (fail fast while the dependency is down)
//!     → retries.rs + backoff.rs (re-attempt with exponential delay)
//!     → timeouts.rs (per-attempt deadline, cancellation token)
//!     → caller's operation
//! ```
//!
//! # Design Decisions
//! - One instance of every gate per handler, shared by all keys
//! - Gate rejections never reach the retry loop
//! - A timed-out attempt is signalled to stop, not aborted
//! - Dedupe caches completed outcomes; it does not collapse in-flight calls

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod dedupe;
pub mod error;
pub mod fallback;
pub mod handler;
pub mod rate_limit;
pub mod retries;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use dedupe::Dedupe;
pub use error::{ErrorKind, OperationError, ResilienceError};
pub use fallback::{fallback, fallback_if};
pub use handler::{HandlerStats, ResilienceHandler};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use retries::{retry, RetryPolicy, RetryPredicate};
pub use timeouts::{timeout, with_deadline};
