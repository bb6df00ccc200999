//! Signal handling for graceful server shutdown.
//!
//! The first termination signal starts a graceful shutdown; a second one while
//! sessions are still draining exits the process at once.

use realm_core::ShutdownState;
use tracing::{error, info, warn};

/// Resolves on the next termination signal: SIGINT or SIGTERM on Unix,
/// Ctrl+C elsewhere.
async fn termination() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Waits for a termination signal.
///
/// # Returns
///
/// A shutdown state that has already been initiated, or an error if the
/// signal handlers could not be installed.
///
/// # Example
///
/// ```ignore
/// let shutdown_state = setup_signal_handlers().await?;
/// assert!(shutdown_state.is_shutdown_initiated());
/// ```
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    termination().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");

    let shutdown_state = ShutdownState::new();
    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}

/// Exits the process with status 1 on the next termination signal.
pub fn exit_on_second_signal() {
    tokio::spawn(async {
        if let Err(e) = termination().await {
            error!("Failed to set up merciless shutdown signal handler: {e}");
            return;
        }

        warn!("Shutdown handler received again! I'll make this quick.");
        std::process::exit(1);
    });
}
