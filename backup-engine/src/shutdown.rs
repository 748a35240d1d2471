//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! The first signal cancels the session token. Copies already in flight
//! finish; files not yet started are recorded as skipped and the session
//! report is still written.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Wait for a shutdown signal, or for the token to be cancelled elsewhere.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling backup after in-flight files...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling backup after in-flight files...");
            }
            _ = self.cancel_token.cancelled() => {
                return;
            }
        }

        self.cancel_token.cancel();
    }

    /// Listen for signals in the background until the token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.wait_for_signal().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_stops_when_token_cancelled() {
        let token = CancellationToken::new();
        let handle = ShutdownCoordinator::new(token.clone()).spawn();

        token.cancel();

        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[test]
    fn test_token_is_shared() {
        let token = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(token.clone());

        coordinator.token().cancel();
        assert!(token.is_cancelled());
    }
}
