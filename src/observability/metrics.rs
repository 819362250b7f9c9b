//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_executions_total` (counter): completed `execute` calls by outcome
//! - `resilience_execution_duration_seconds` (histogram): end-to-end latency by outcome
//! - `resilience_rejections_total` (counter): admission-gate rejections by gate
//! - `resilience_retries_total` (counter): retry sleeps taken
//! - `resilience_circuit_transitions_total` (counter): breaker transitions by from/to
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `resilience_bulkhead_in_use` / `resilience_rate_limit_tokens` /
//!   `resilience_dedupe_entries` (gauges): point-in-time handler stats
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::{CircuitState, HandlerStats};

/// Install the Prometheus recorder and serve it on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a finished `execute` call. `outcome` is `"ok"` or an error kind label.
pub fn record_execution(outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!("resilience_executions_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("resilience_execution_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn record_rejection(gate: &'static str) {
    ::metrics::counter!("resilience_rejections_total", "gate" => gate).increment(1);
}

pub fn record_retry() {
    ::metrics::counter!("resilience_retries_total").increment(1);
}

pub fn record_circuit_transition(from: &'static str, to: &'static str) {
    ::metrics::counter!("resilience_circuit_transitions_total", "from" => from, "to" => to)
        .increment(1);
}

/// Export a stats snapshot as gauges.
pub fn record_stats(stats: &HandlerStats) {
    let state = match stats.circuit_state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("resilience_circuit_state").set(state);
    ::metrics::gauge!("resilience_circuit_failures").set(f64::from(stats.circuit_failures));
    ::metrics::gauge!("resilience_bulkhead_in_use").set(stats.bulkhead_current as f64);
    ::metrics::gauge!("resilience_bulkhead_capacity").set(stats.bulkhead_max as f64);
    ::metrics::gauge!("resilience_rate_limit_tokens").set(stats.available_tokens as f64);
    ::metrics::gauge!("resilience_dedupe_entries").set(stats.dedupe_entries as f64);
}
