//! Process lifecycle for the CLI driver.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     Ctrl-C → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber stops issuing new work → in-flight calls finish
//! ```
//!
//! # Design Decisions
//! - The handler itself has no teardown; only the driver loop observes shutdown
//! - In-flight operations are allowed to complete rather than being aborted

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
