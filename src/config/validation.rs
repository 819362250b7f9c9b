//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and capacities >= 1, periods > 0)
//! - Check cross-field consistency (base delay <= max delay)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::PipelineConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `retries.multiplier`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.success_threshold",
            "must be at least 1",
        ));
    }
    if cb.open_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.open_timeout_ms",
            "must be greater than 0",
        ));
    }

    let retries = &config.retries;
    if !retries.multiplier.is_finite() || retries.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retries.multiplier",
            format!("must be a finite number >= 1.0, got {}", retries.multiplier),
        ));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            format!(
                "must not exceed max_delay_ms ({} > {})",
                retries.base_delay_ms, retries.max_delay_ms
            ),
        ));
    }

    if config.timeouts.operation_ms == 0 {
        errors.push(ValidationError::new("timeouts.operation_ms", "must be greater than 0"));
    }

    if config.bulkhead.max_concurrent == 0 {
        errors.push(ValidationError::new("bulkhead.max_concurrent", "must be at least 1"));
    }

    if config.rate_limit.max_tokens == 0 {
        errors.push(ValidationError::new("rate_limit.max_tokens", "must be at least 1"));
    }
    if config.rate_limit.refill_period_ms == 0 {
        errors.push(ValidationError::new("rate_limit.refill_period_ms", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}, expected one of {:?}", obs.log_level, LOG_LEVELS),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
