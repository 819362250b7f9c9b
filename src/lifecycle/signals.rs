//! OS signal handling.

use crate::lifecycle::Shutdown;

/// Wait for Ctrl-C and trigger `shutdown`.
///
/// If the handler cannot be installed the error is logged and shutdown is
/// left to the caller's other exit paths.
pub async fn wait_for_ctrl_c(shutdown: Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        }
    }
}
