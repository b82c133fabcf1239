//! CLI command implementations for stackpulse.
//!
//! - `watch`: continuous monitoring with dashboard, JSON or log output
//! - `status`: a single sample, evaluated and printed
//! - `config`: configuration file generation

pub mod config;
pub mod status;
pub mod watch;

pub use config::command_config;
pub use status::command_status;
pub use watch::command_watch;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `cancel` on SIGINT or SIGTERM.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
