//! The composed pipeline.
//!
//! ```text
//! execute(key, op)
//!     → dedupe (replay a fresh outcome for key)
//!     → rate limiter (one token per call)
//!     → bulkhead
//!     → circuit breaker (one success/failure per call)
//!     → retry
//!     → timeout (per attempt)
//!     → op(token)
//! ```
//!
//! Every gate is a single instance shared by all keys.

use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::observability::metrics;
use crate::resilience::bulkhead::Bulkhead;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::dedupe::Dedupe;
use crate::resilience::error::ResilienceError;
use crate::resilience::fallback::fallback;
use crate::resilience::rate_limit::RateLimiter;
use crate::resilience::retries::{retry, RetryPolicy};
use crate::resilience::timeouts::with_deadline;

type CachedOutcome = Result<Arc<dyn Any + Send + Sync>, ResilienceError>;

/// Point-in-time view of the handler's gates. Reads are not taken atomically
/// with respect to each other.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerStats {
    pub circuit_state: CircuitState,
    pub circuit_failures: u32,
    pub bulkhead_current: usize,
    pub bulkhead_max: usize,
    pub available_tokens: u64,
    pub max_tokens: u64,
    pub dedupe_entries: usize,
}

/// Wraps arbitrary async operations in the full resilience pipeline.
///
/// Construct once and share it behind an `Arc`.
pub struct ResilienceHandler {
    circuit_breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    operation_timeout: Duration,
    bulkhead: Bulkhead,
    rate_limiter: RateLimiter,
    dedupe: Dedupe<String, CachedOutcome>,
}

impl std::fmt::Debug for ResilienceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceHandler")
            .field("stats", &self.stats())
            .field("retry_policy", &self.retry_policy)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl ResilienceHandler {
    pub fn new(config: &PipelineConfig) -> Self {
        let cb = &config.circuit_breaker;
        Self {
            circuit_breaker: CircuitBreaker::new(
                cb.failure_threshold,
                cb.success_threshold,
                cb.open_timeout(),
            )
            .with_single_probe(cb.single_probe),
            retry_policy: RetryPolicy::from_config(&config.retries),
            operation_timeout: config.timeouts.operation(),
            bulkhead: Bulkhead::new(config.bulkhead.max_concurrent),
            rate_limiter: RateLimiter::new(
                config.rate_limit.max_tokens,
                config.rate_limit.refill_period(),
            ),
            dedupe: Dedupe::new(config.dedupe.window()),
        }
    }

    /// Replace the retry predicate. Errors it rejects are returned without another attempt.
    pub fn with_retry_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.retry_policy = self.retry_policy.with_predicate(predicate);
        self
    }

    /// Run `operation` through every gate.
    ///
    /// `operation` is called once per attempt with a token that is cancelled
    /// when that attempt's deadline passes. A successful or failed outcome is
    /// replayed for the same `key` until the dedupe window lapses; gate
    /// rejections are replayed too.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &str,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        T: Clone + Send + Sync + 'static,
        E: StdError + Send + Sync + 'static,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let started = Instant::now();

        let outcome = self
            .dedupe
            .execute(key.to_owned(), async {
                self.run_gated(&mut operation)
                    .await
                    .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
            })
            .await;

        let result = match outcome {
            Ok(value) => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| ResilienceError::TypeMismatch { key: key.to_owned() }),
            Err(err) => Err(err),
        };

        let elapsed = started.elapsed();
        let outcome_label = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        tracing::debug!(
            key,
            outcome = outcome_label,
            elapsed_ms = elapsed.as_millis() as u64,
            "Execution finished"
        );
        metrics::record_execution(outcome_label, elapsed);

        result
    }

    /// Like [`execute`](Self::execute), but hands any error to `on_error` for a substitute result.
    /// The substitute is not cached.
    pub async fn execute_with_fallback<T, E, F, Fut, H, HFut>(
        &self,
        key: &str,
        operation: F,
        on_error: H,
    ) -> Result<T, ResilienceError>
    where
        T: Clone + Send + Sync + 'static,
        E: StdError + Send + Sync + 'static,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        H: FnOnce(ResilienceError) -> HFut,
        HFut: Future<Output = Result<T, ResilienceError>>,
    {
        fallback(self.execute(key, operation), on_error).await
    }

    async fn run_gated<T, E, F, Fut>(&self, operation: &mut F) -> Result<T, ResilienceError>
    where
        T: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let result = if self.rate_limiter.allow() {
            let deadline = self.operation_timeout;
            self.bulkhead
                .execute(self.circuit_breaker.execute(retry(&self.retry_policy, |_attempt| {
                    let token = CancellationToken::new();
                    let attempt = operation(token.clone());
                    with_deadline(deadline, token, attempt)
                })))
                .await
        } else {
            tracing::debug!("Rate limit exhausted, rejecting");
            Err(ResilienceError::RateLimited)
        };

        if let Err(err) = &result {
            if err.is_rejection() {
                metrics::record_rejection(err.kind().as_str());
            }
        }
        result
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_failures(&self) -> u32 {
        self.circuit_breaker.failures()
    }

    pub fn bulkhead_current(&self) -> usize {
        self.bulkhead.current()
    }

    pub fn bulkhead_max(&self) -> usize {
        self.bulkhead.max_concurrent()
    }

    /// Tokens left in the bucket. Refills as a side effect.
    pub fn available_tokens(&self) -> u64 {
        self.rate_limiter.available_tokens()
    }

    /// Stored outcomes, including expired ones not yet pruned.
    pub fn dedupe_cache_size(&self) -> usize {
        self.dedupe.len()
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            circuit_state: self.circuit_state(),
            circuit_failures: self.circuit_failures(),
            bulkhead_current: self.bulkhead_current(),
            bulkhead_max: self.bulkhead_max(),
            available_tokens: self.available_tokens(),
            max_tokens: self.rate_limiter.max_tokens(),
            dedupe_entries: self.dedupe_cache_size(),
        }
    }
}
