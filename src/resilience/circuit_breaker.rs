//! Circuit breaker shared by every call through the pipeline.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: trial requests decide whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first admission check after open_timeout has elapsed
//! Half-Open → Closed: successes >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! Half-Open admits every caller unless `single_probe` is set, in which case
//! only one trial call may be in flight at a time.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::error::ResilienceError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    // Bumped each time the probe slot is handed out.
    probe_generation: u64,
}

/// Proof of admission returned by [`CircuitBreaker::try_acquire`].
///
/// Only the admission that took the Half-Open probe slot can free it, via
/// [`CircuitBreaker::release`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    probe: Option<u64>,
}

impl Admission {
    /// Whether this caller holds the single Half-Open probe slot.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    failures: u32,
}

impl Transition {
    fn report(self) {
        if self.to == CircuitState::Open {
            tracing::warn!(from = self.from.as_str(), failures = self.failures, "Circuit opened");
        } else {
            tracing::info!(
                from = self.from.as_str(),
                to = self.to.as_str(),
                "Circuit state changed"
            );
        }
        metrics::record_circuit_transition(self.from.as_str(), self.to.as_str());
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    single_probe: bool,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_timeout,
            single_probe: false,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                probe_in_flight: false,
                probe_generation: 0,
            }),
        }
    }

    /// Allow only one trial call at a time while Half-Open.
    pub fn with_single_probe(mut self, single_probe: bool) -> Self {
        self.single_probe = single_probe;
        self
    }

    /// Admission check. Moves Open to Half-Open once the cooldown has passed,
    /// admitting the caller that triggers the move.
    ///
    /// With `single_probe`, the Half-Open admission is marked as the probe and
    /// must be handed back through [`release`](Self::release).
    pub fn try_acquire(&self) -> Result<Admission, ResilienceError> {
        let (admission, transition) = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => (Admission { probe: None }, None),
                CircuitState::Open => {
                    let cooled = inner
                        .last_failure
                        .map_or(true, |at| at.elapsed() > self.open_timeout);
                    if !cooled {
                        return Err(ResilienceError::CircuitOpen);
                    }
                    let transition = self.transition(&mut inner, CircuitState::HalfOpen);
                    (self.take_probe(&mut inner), transition)
                }
                CircuitState::HalfOpen => {
                    if self.single_probe && inner.probe_in_flight {
                        return Err(ResilienceError::CircuitOpen);
                    }
                    (self.take_probe(&mut inner), None)
                }
            }
        };
        if let Some(transition) = transition {
            transition.report();
        }
        Ok(admission)
    }

    /// Free the probe slot if `admission` holds it. Other admissions are ignored.
    pub fn release(&self, admission: Admission) {
        let Some(generation) = admission.probe else {
            return;
        };
        let mut inner = self.lock();
        if inner.probe_in_flight && inner.probe_generation == generation {
            inner.probe_in_flight = false;
        }
    }

    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    if inner.successes >= self.success_threshold {
                        self.transition(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before the trip finished late; it carries no signal.
                CircuitState::Open => None,
            }
        };
        if let Some(transition) = transition {
            transition.report();
        }
    }

    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failures += 1;
                    if inner.failures >= self.failure_threshold {
                        inner.last_failure = Some(Instant::now());
                        self.transition(&mut inner, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.failures += 1;
                    inner.last_failure = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open)
                }
                CircuitState::Open => {
                    inner.failures += 1;
                    inner.last_failure = Some(Instant::now());
                    None
                }
            }
        };
        if let Some(transition) = transition {
            transition.report();
        }
    }

    /// Gate `fut` through the breaker and record its outcome.
    ///
    /// The future is not polled when the breaker rejects the call.
    pub async fn execute<T, F>(&self, fut: F) -> Result<T, ResilienceError>
    where
        F: Future<Output = Result<T, ResilienceError>>,
    {
        let admission = self.try_acquire()?;
        // Declared before the await so the slot is freed on drop as well as on completion.
        let _slot = ProbeSlot {
            breaker: self,
            admission,
        };

        let result = fut.await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures counted since the last reset.
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// Half-Open successes counted towards closing.
    pub fn successes(&self) -> u32 {
        self.lock().successes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_probe(&self, inner: &mut Inner) -> Admission {
        if !self.single_probe {
            return Admission { probe: None };
        }
        inner.probe_generation += 1;
        inner.probe_in_flight = true;
        Admission {
            probe: Some(inner.probe_generation),
        }
    }

    /// Apply a state change. The caller reports it once the lock is dropped.
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        inner.probe_in_flight = false;
        match to {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.successes = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => inner.successes = 0,
        }
        Some(Transition {
            from,
            to,
            failures: inner.failures,
        })
    }
}

/// Hands the probe slot back when the gated call finishes or is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.breaker.release(self.admission);
    }
}
