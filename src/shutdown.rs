//! Graceful shutdown handling

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Broadcasts a single shutdown signal to every subscriber
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Receiver that observes `true` once shutdown starts
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown manually
    pub fn shutdown(&self) {
        info!("Shutdown triggered");
        self.sender.send_replace(true);
    }

    /// Wait for Ctrl+C or SIGTERM, then notify subscribers
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C signal"),
            _ = terminate => info!("Received SIGTERM signal"),
        }

        self.shutdown();
    }

    /// Resolves once shutdown has been triggered
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        // An error means the sender is gone, which also ends the wait
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
