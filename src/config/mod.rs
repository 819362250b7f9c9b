//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → ResilienceHandler::new builds every gate once
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; the handler it builds lives for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::PipelineConfig;
pub use schema::{
    BulkheadConfig, CircuitBreakerConfig, DedupeConfig, ObservabilityConfig, RateLimitConfig,
    RetryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
