//! Deadline enforcement for a single attempt.
//!
//! The attempt runs as its own Tokio task and is raced against the deadline.
//! On expiry the task is not aborted: its [`CancellationToken`] is cancelled
//! and the task is disowned. Operations are expected to watch the token and
//! stop promptly; one that ignores it runs to completion in the background.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::resilience::error::ResilienceError;

/// Run the future built by `op` with a deadline of `duration`.
///
/// Errors from the operation are wrapped as [`ResilienceError::Operation`].
/// A panic inside the operation is resumed on the caller.
pub async fn timeout<T, E, F, Fut>(duration: Duration, op: F) -> Result<T, ResilienceError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: StdError + Send + Sync + 'static,
{
    let token = CancellationToken::new();
    let fut = op(token.clone());
    with_deadline(duration, token, fut).await
}

/// Race an already-built attempt against `duration`, cancelling `token` on expiry.
pub async fn with_deadline<T, E, Fut>(
    duration: Duration,
    token: CancellationToken,
    fut: Fut,
) -> Result<T, ResilienceError>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: StdError + Send + Sync + 'static,
{
    // Cancels the operation if this caller goes away mid-race.
    let guard = token.drop_guard();
    let handle = tokio::spawn(fut);

    match tokio::time::timeout(duration, handle).await {
        Ok(joined) => {
            guard.disarm();
            match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(ResilienceError::operation(err)),
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(_) => Err(ResilienceError::Cancelled),
            }
        }
        Err(_) => {
            tracing::debug!(
                timeout = ?duration,
                "Operation deadline exceeded, signalling cancellation"
            );
            drop(guard);
            Err(ResilienceError::Timeout(duration))
        }
    }
}
