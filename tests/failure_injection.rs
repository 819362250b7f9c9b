//! Failure injection tests for the composed pipeline.

use std::sync::Arc;
use std::time::Duration;

use resilience_pipeline::resilience::{CircuitState, ResilienceError, ResilienceHandler};
use tokio_util::sync::CancellationToken;

mod common;
use common::{Calls, TestError};

#[tokio::test(start_paused = true)]
async fn test_breaker_trips_and_recovers_end_to_end() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.success_threshold = 1;
    config.circuit_breaker.open_timeout_ms = 100;
    let handler = ResilienceHandler::new(&config);
    let failing = Calls::new();

    let first = handler.execute("k", common::always_fail(&failing)).await;
    assert_eq!(first.unwrap_err().downcast_ref::<TestError>(), Some(&TestError::Unavailable));
    assert_eq!(handler.circuit_state(), CircuitState::Closed);
    assert_eq!(handler.circuit_failures(), 1);

    let second = handler.execute("k", common::always_fail(&failing)).await;
    assert!(matches!(second, Err(ResilienceError::Operation(_))));
    assert_eq!(handler.circuit_state(), CircuitState::Open);

    let third = handler.execute("k", common::always_fail(&failing)).await;
    assert!(matches!(third, Err(ResilienceError::CircuitOpen)));
    assert_eq!(failing.count(), 2, "an open breaker must not invoke the operation");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let healthy = Calls::new();
    handler.execute("k", common::succeed_with(&healthy, 1u8)).await.unwrap();
    assert_eq!(healthy.count(), 1);
    assert_eq!(handler.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.open_timeout_ms = 100;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let _ = handler.execute("k", common::always_fail(&calls)).await;
    assert_eq!(handler.circuit_state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(101)).await;
    let _ = handler.execute("k", common::always_fail(&calls)).await;
    assert_eq!(calls.count(), 2);
    assert_eq!(handler.circuit_state(), CircuitState::Open);

    let res = handler.execute("k", common::always_fail(&calls)).await;
    assert!(matches!(res, Err(ResilienceError::CircuitOpen)));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_sees_one_failure_per_call() {
    let mut config = common::test_config();
    config.retries.max_retries = 2;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let res = handler.execute("k", common::always_fail(&calls)).await;

    assert!(res.is_err());
    assert_eq!(calls.count(), 3);
    assert_eq!(handler.circuit_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_transient_failures() {
    let mut config = common::test_config();
    config.retries.max_retries = 3;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let value = handler.execute("k", common::fail_first(&calls, 2)).await.unwrap();

    assert_eq!(value, 2);
    assert_eq!(calls.count(), 3);
    assert_eq!(handler.circuit_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_and_cancels_each_attempt() {
    let mut config = common::test_config();
    config.retries.max_retries = 1;
    config.timeouts.operation_ms = 50;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let res = handler
        .execute("k", common::hold_until(&calls, CancellationToken::new()))
        .await;

    assert!(matches!(res, Err(ResilienceError::Timeout(d)) if d == Duration::from_millis(50)));
    assert_eq!(calls.count(), 2);
    assert_eq!(handler.circuit_failures(), 1);
}

#[tokio::test]
async fn test_bulkhead_is_shared_across_keys() {
    let mut config = common::test_config();
    config.bulkhead.max_concurrent = 2;
    let handler = Arc::new(ResilienceHandler::new(&config));
    let release = CancellationToken::new();
    let held = Calls::new();

    let mut running = Vec::new();
    for key in ["a", "b"] {
        let handler = handler.clone();
        let op = common::hold_until(&held, release.clone());
        running.push(tokio::spawn(async move { handler.execute(key, op).await }));
    }
    common::wait_until(|| handler.bulkhead_current() == 2).await;

    let rejected = Calls::new();
    let res = handler.execute("c", common::succeed_with(&rejected, ())).await;
    assert!(matches!(res, Err(ResilienceError::BulkheadFull { max_concurrent: 2 })));
    assert_eq!(rejected.count(), 0);

    release.cancel();
    for task in running {
        task.await.unwrap().unwrap();
    }
    assert_eq!(handler.bulkhead_current(), 0);
    assert_eq!(handler.circuit_failures(), 0, "bulkhead rejections are not breaker failures");
}

#[tokio::test]
async fn test_panicking_operation_releases_bulkhead() {
    let mut config = common::test_config();
    config.bulkhead.max_concurrent = 1;
    let handler = Arc::new(ResilienceHandler::new(&config));

    let worker = handler.clone();
    let joined = tokio::spawn(async move {
        worker
            .execute("k", |_| async {
                if true {
                    panic!("operation exploded");
                }
                Ok::<(), TestError>(())
            })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(handler.bulkhead_current(), 0);
    let calls = Calls::new();
    handler.execute("k", common::succeed_with(&calls, ())).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_checked_once_per_call() {
    let mut config = common::test_config();
    config.rate_limit.max_tokens = 1;
    config.rate_limit.refill_period_ms = 1_000;
    config.retries.max_retries = 2;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let first = handler.execute("a", common::always_fail(&calls)).await;
    assert!(matches!(first, Err(ResilienceError::Operation(_))));
    assert_eq!(calls.count(), 3);

    let second = handler.execute("b", common::always_fail(&calls)).await;
    assert!(matches!(second, Err(ResilienceError::RateLimited)));
    assert_eq!(calls.count(), 3);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(handler.available_tokens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dedupe_replays_outcomes_inside_window() {
    let mut config = common::test_config();
    config.dedupe.window_ms = 200;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let first = handler.execute("k", common::always_fail(&calls)).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = handler.execute("k", common::always_fail(&calls)).await.unwrap_err();

    assert_eq!(calls.count(), 1);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(handler.circuit_failures(), 1, "a replayed outcome is not a new failure");

    let other = handler.execute("other", common::always_fail(&calls)).await;
    assert!(other.is_err());
    assert_eq!(calls.count(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = handler.execute("k", common::always_fail(&calls)).await;
    assert_eq!(calls.count(), 3);
}

#[tokio::test]
async fn test_overlapping_same_key_calls_both_run() {
    let mut config = common::test_config();
    config.dedupe.window_ms = 60_000;
    let handler = Arc::new(ResilienceHandler::new(&config));
    let release = CancellationToken::new();
    let calls = Calls::new();

    let mut running = Vec::new();
    for _ in 0..2 {
        let handler = handler.clone();
        let op = common::hold_until(&calls, release.clone());
        running.push(tokio::spawn(async move { handler.execute("k", op).await }));
    }
    common::wait_until(|| calls.count() == 2).await;
    release.cancel();
    for task in running {
        task.await.unwrap().unwrap();
    }

    assert_eq!(calls.count(), 2);
    handler.execute("k", common::hold_until(&calls, release.clone())).await.unwrap();
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_single_probe_rejects_concurrent_half_open_calls() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.success_threshold = 1;
    config.circuit_breaker.open_timeout_ms = 20;
    config.circuit_breaker.single_probe = true;
    let handler = Arc::new(ResilienceHandler::new(&config));
    let calls = Calls::new();

    let _ = handler.execute("k", common::always_fail(&calls)).await;
    assert_eq!(handler.circuit_state(), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let release = CancellationToken::new();
    let probe = {
        let handler = handler.clone();
        let op = common::hold_until(&calls, release.clone());
        tokio::spawn(async move { handler.execute("probe", op).await })
    };
    common::wait_until(|| calls.count() == 2).await;
    assert_eq!(handler.circuit_state(), CircuitState::HalfOpen);

    let res = handler.execute("other", common::succeed_with(&calls, ())).await;
    assert!(matches!(res, Err(ResilienceError::CircuitOpen)));

    release.cancel();
    probe.await.unwrap().unwrap();
    assert_eq!(handler.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_late_call_finishing_in_half_open_keeps_trial_exclusive() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.success_threshold = 5;
    config.circuit_breaker.open_timeout_ms = 20;
    config.circuit_breaker.single_probe = true;
    let handler = Arc::new(ResilienceHandler::new(&config));

    let late_release = CancellationToken::new();
    let late_calls = Calls::new();
    let late = {
        let handler = handler.clone();
        let op = common::hold_until(&late_calls, late_release.clone());
        tokio::spawn(async move { handler.execute("late", op).await })
    };
    common::wait_until(|| late_calls.count() == 1).await;

    let failing = Calls::new();
    let _ = handler.execute("k", common::always_fail(&failing)).await;
    assert_eq!(handler.circuit_state(), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let probe_release = CancellationToken::new();
    let probe_calls = Calls::new();
    let probe = {
        let handler = handler.clone();
        let op = common::hold_until(&probe_calls, probe_release.clone());
        tokio::spawn(async move { handler.execute("probe", op).await })
    };
    common::wait_until(|| probe_calls.count() == 1).await;
    assert_eq!(handler.circuit_state(), CircuitState::HalfOpen);

    late_release.cancel();
    late.await.unwrap().unwrap();

    let rejected = Calls::new();
    let res = handler.execute("other", common::succeed_with(&rejected, ())).await;
    assert!(matches!(res, Err(ResilienceError::CircuitOpen)));
    assert_eq!(rejected.count(), 0);

    probe_release.cancel();
    probe.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fallback_covers_open_circuit() {
    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 1;
    let handler = ResilienceHandler::new(&config);
    let calls = Calls::new();

    let _ = handler.execute("k", common::always_fail(&calls)).await;
    let value = handler
        .execute_with_fallback("k", common::succeed_with(&calls, "live"), |err| async move {
            assert!(err.is_rejection());
            Ok("cached")
        })
        .await
        .unwrap();

    assert_eq!(value, "cached");
    assert_eq!(calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_predicate_limits_retries_to_timeouts() {
    let mut config = common::test_config();
    config.retries.max_retries = 3;
    config.timeouts.operation_ms = 10;
    let handler = ResilienceHandler::new(&config).with_retry_predicate(ResilienceError::is_timeout);

    let failing = Calls::new();
    let _ = handler.execute("a", common::always_fail(&failing)).await;
    assert_eq!(failing.count(), 1);

    let slow = Calls::new();
    let res = handler.execute("b", common::slow(&slow, Duration::from_secs(1))).await;
    assert!(res.unwrap_err().is_timeout());
    assert_eq!(slow.count(), 4);
}
