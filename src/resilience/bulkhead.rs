//! Bounded concurrency gate.
//!
//! Callers that find every slot taken are rejected immediately rather than queued.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::resilience::error::ResilienceError;

/// Limits how many operations run inside the protected region at once.
#[derive(Debug)]
pub struct Bulkhead {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// A held bulkhead slot. The slot is released when the permit drops,
/// including while unwinding from a panic.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Take a slot without waiting.
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| BulkheadPermit { _permit: permit })
    }

    /// Run `fut` while holding a slot, or fail with [`ResilienceError::BulkheadFull`].
    pub async fn execute<T, F>(&self, fut: F) -> Result<T, ResilienceError>
    where
        F: Future<Output = Result<T, ResilienceError>>,
    {
        let Some(_permit) = self.try_acquire() else {
            tracing::debug!(max_concurrent = self.max_concurrent, "Bulkhead full, rejecting");
            return Err(ResilienceError::BulkheadFull {
                max_concurrent: self.max_concurrent,
            });
        };
        fut.await
    }

    /// Number of slots currently held.
    pub fn current(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.slots.available_permits())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
