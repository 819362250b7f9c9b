//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline layers produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Gates report through free functions, never through the caller's operation
//! - Handler stats are point-in-time reads, exported as gauges

pub mod logging;
pub mod metrics;
