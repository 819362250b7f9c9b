//! Token bucket admission gate.
//!
//! Refill is lazy: every check computes how many whole refill periods have
//! elapsed since `last_refill` and adds that many tokens, clipped to capacity.
//! The fractional remainder of a period is dropped when tokens are added.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors from the blocking acquisition path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// More tokens requested than the bucket can ever hold.
    #[error("requested {requested} tokens but bucket capacity is {capacity}")]
    ExceedsCapacity { requested: u64, capacity: u64 },
}

#[derive(Debug)]
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

/// A token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_tokens: u64,
    refill_period: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket holding `max_tokens`, gaining one token per `refill_period`.
    pub fn new(max_tokens: u64, refill_period: Duration) -> Self {
        Self {
            max_tokens,
            // A zero period would divide by zero during refill.
            refill_period: refill_period.max(Duration::from_nanos(1)),
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    /// Take `n` tokens if all of them are available. Never blocks.
    pub fn allow_n(&self, n: u64) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Wait until one token is available.
    pub async fn wait(&self) -> Result<(), RateLimitError> {
        self.wait_n(1).await
    }

    /// Wait until `n` tokens are available, polling every tenth of a refill period.
    ///
    /// The poll interval is never shorter than 1ms, the resolution of the Tokio
    /// timer, so refill periods under 10ms are polled every millisecond rather
    /// than every tenth of a period.
    ///
    /// There is no upper bound on the wait; wrap the call in
    /// `tokio::time::timeout` or a `select!` to bound it.
    pub async fn wait_n(&self, n: u64) -> Result<(), RateLimitError> {
        if n > self.max_tokens {
            return Err(RateLimitError::ExceedsCapacity {
                requested: n,
                capacity: self.max_tokens,
            });
        }

        let poll = (self.refill_period / 10).max(Duration::from_millis(1));
        loop {
            if self.allow_n(n) {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Instantaneous token count, refreshed with any pending refill.
    pub fn available_tokens(&self) -> u64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let periods = elapsed.as_nanos() / self.refill_period.as_nanos();
        if periods > 0 {
            let add = u64::try_from(periods).unwrap_or(u64::MAX);
            bucket.tokens = bucket.tokens.saturating_add(add).min(self.max_tokens);
            bucket.last_refill = now;
        }
    }
}
