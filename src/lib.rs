//! Composable resilience primitives and a pipeline that wraps async operations in them.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::PipelineConfig;
pub use lifecycle::Shutdown;
pub use resilience::{ErrorKind, HandlerStats, ResilienceError, ResilienceHandler};
