//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::resilience::retries::RetryPolicy;

/// Delay to sleep after the failed attempt with 0-based index `attempt`.
///
/// `min(base_delay * multiplier^attempt, max_delay)`, plus a uniform extra
/// amount in `[0, delay / 2)` when jitter is enabled.
pub fn calculate_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let capped = exponential_delay(policy, attempt);
    if !policy.jitter {
        return capped;
    }

    let jitter_range = capped.as_nanos() / 2;
    let jitter = if jitter_range > 0 {
        let range = u64::try_from(jitter_range).unwrap_or(u64::MAX);
        rand::thread_rng().gen_range(0..range)
    } else {
        0
    };

    capped.saturating_add(Duration::from_nanos(jitter))
}

fn exponential_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let delay_nanos = policy.base_delay.as_nanos() as f64 * policy.multiplier.powi(exponent);

    if !delay_nanos.is_finite() || delay_nanos >= policy.max_delay.as_nanos() as f64 {
        return policy.max_delay;
    }
    Duration::from_nanos(delay_nanos.max(0.0).round() as u64)
}
