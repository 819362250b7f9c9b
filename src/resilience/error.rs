//! Error taxonomy surfaced to callers of the pipeline.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Type-erased operation error. `Arc` keeps it cheap to replay from the dedupe cache.
pub type OperationError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors returned by [`ResilienceHandler::execute`](crate::resilience::ResilienceHandler::execute)
/// and the individual gates.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// Admission denied by the token bucket.
    #[error("rate limit exceeded")]
    RateLimited,

    /// No free concurrency slot.
    #[error("bulkhead capacity exceeded (max {max_concurrent} concurrent)")]
    BulkheadFull { max_concurrent: usize },

    /// Breaker rejected the call without invoking the operation.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The wrapped operation itself failed.
    #[error("operation failed: {0}")]
    Operation(#[source] OperationError),

    /// The runtime cancelled the task running the operation.
    #[error("operation task was cancelled")]
    Cancelled,

    /// A cached outcome under this key holds a different value type.
    #[error("cached outcome for key {key:?} has a different value type")]
    TypeMismatch { key: String },
}

/// Stable classification of a [`ResilienceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    BulkheadFull,
    CircuitOpen,
    Timeout,
    Operation,
    Cancelled,
    TypeMismatch,
}

impl ErrorKind {
    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BulkheadFull => "bulkhead_full",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Operation => "operation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TypeMismatch => "type_mismatch",
        }
    }
}

impl ResilienceError {
    /// Wrap a caller error as an [`ResilienceError::Operation`].
    pub fn operation<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ResilienceError::Operation(Arc::new(err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::RateLimited => ErrorKind::RateLimited,
            ResilienceError::BulkheadFull { .. } => ErrorKind::BulkheadFull,
            ResilienceError::CircuitOpen => ErrorKind::CircuitOpen,
            ResilienceError::Timeout(_) => ErrorKind::Timeout,
            ResilienceError::Operation(_) => ErrorKind::Operation,
            ResilienceError::Cancelled => ErrorKind::Cancelled,
            ResilienceError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        }
    }

    /// True for errors produced by an admission gate before the operation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::RateLimited
                | ResilienceError::BulkheadFull { .. }
                | ResilienceError::CircuitOpen
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout(_))
    }

    /// The caller's own error, if this is an operation failure.
    pub fn operation_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            ResilienceError::Operation(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Downcast the wrapped operation error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.operation_error().and_then(|err| err.downcast_ref::<E>())
    }
}
