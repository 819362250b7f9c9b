//! Fallback on failure.

use std::future::Future;

use crate::resilience::error::ResilienceError;

/// Await `primary`; on error, hand the error to `on_error` and await its result instead.
pub async fn fallback<T, P, F, Fut>(primary: P, on_error: F) -> Result<T, ResilienceError>
where
    P: Future<Output = Result<T, ResilienceError>>,
    F: FnOnce(ResilienceError) -> Fut,
    Fut: Future<Output = Result<T, ResilienceError>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(err) => on_error(err).await,
    }
}

/// Like [`fallback`], but only falls back when `predicate` accepts the error.
pub async fn fallback_if<T, P, F, Fut, C>(
    primary: P,
    on_error: F,
    predicate: C,
) -> Result<T, ResilienceError>
where
    P: Future<Output = Result<T, ResilienceError>>,
    F: FnOnce(ResilienceError) -> Fut,
    Fut: Future<Output = Result<T, ResilienceError>>,
    C: FnOnce(&ResilienceError) -> bool,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(err) if predicate(&err) => on_error(err).await,
        Err(err) => Err(err),
    }
}
