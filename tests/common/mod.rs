//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use resilience_pipeline::config::PipelineConfig;
use tokio_util::sync::CancellationToken;

/// One attempt of a scripted operation.
pub type Attempt<T> = BoxFuture<'static, Result<T, TestError>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TestError {
    #[error("dependency unavailable")]
    Unavailable,
    #[error("attempt cancelled")]
    Cancelled,
}

/// Counts how many times an operation was invoked.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicU32>);

impl Calls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Config with no retry jitter, no dedupe and a generous rate limit.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retries.max_retries = 0;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config.retries.jitter = false;
    config.timeouts.operation_ms = 5_000;
    config.rate_limit.max_tokens = 10_000;
    config.dedupe.window_ms = 0;
    config
}

pub fn always_fail(calls: &Calls) -> impl FnMut(CancellationToken) -> Attempt<()> + Send {
    let calls = calls.clone();
    move |_| {
        calls.bump();
        async { Err(TestError::Unavailable) }.boxed()
    }
}

pub fn succeed_with<T>(
    calls: &Calls,
    value: T,
) -> impl FnMut(CancellationToken) -> Attempt<T> + Send
where
    T: Clone + Send + 'static,
{
    let calls = calls.clone();
    move |_| {
        calls.bump();
        let value = value.clone();
        async move { Ok(value) }.boxed()
    }
}

/// Fails the first `failures` invocations, then succeeds.
pub fn fail_first(
    calls: &Calls,
    failures: u32,
) -> impl FnMut(CancellationToken) -> Attempt<u32> + Send {
    let calls = calls.clone();
    move |_| {
        let n = calls.bump();
        async move {
            if n < failures {
                Err(TestError::Unavailable)
            } else {
                Ok(n)
            }
        }
        .boxed()
    }
}

/// Succeeds once `release` is cancelled. Returns early with an error if the
/// attempt's own token is cancelled first.
pub fn hold_until(
    calls: &Calls,
    release: CancellationToken,
) -> impl FnMut(CancellationToken) -> Attempt<()> + Send {
    let calls = calls.clone();
    move |token: CancellationToken| {
        calls.bump();
        let release = release.clone();
        async move {
            tokio::select! {
                _ = release.cancelled() => Ok(()),
                _ = token.cancelled() => Err(TestError::Cancelled),
            }
        }
        .boxed()
    }
}

/// Sleeps for `latency` unless cancelled.
pub fn slow(
    calls: &Calls,
    latency: Duration,
) -> impl FnMut(CancellationToken) -> Attempt<()> + Send {
    let calls = calls.clone();
    move |token: CancellationToken| {
        calls.bump();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(latency) => Ok(()),
                _ = token.cancelled() => Err(TestError::Cancelled),
            }
        }
        .boxed()
    }
}

/// Yield until `cond` holds. Panics after many rounds so a broken test does not hang.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
