//! ESS Control Service Library
//!
//! Mediates between a Victron MultiPlus inverter/charger (VE.Bus via an
//! MK2/MK3 serial adapter) and a Shelly whole-house energy meter, driving
//! the inverter's ESS setpoint so the net grid power is regulated toward
//! zero.

pub mod config;
pub mod control;
pub mod error;
pub mod meter;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::{EssrvError, Result};

use tracing::warn;

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    // If SIGTERM handler failed, wait forever (only Ctrl+C will work)
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
