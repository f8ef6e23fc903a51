//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! After a signal no new run is started. A run already in progress is given
//! a grace period to finish, so its workspace cleanup can complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How long an active run may keep going after a shutdown signal
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Whether a shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait for shutdown signal (SIGTERM or SIGINT)
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
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
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger();
    }

    /// Mark shutdown as requested
    fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Wait for the run holding `active_run` to release it, up to the grace
    /// period. Returns `false` when the run was still going at the deadline.
    pub async fn shutdown(&self, active_run: &Mutex<()>) -> bool {
        info!("Graceful shutdown initiated");

        match tokio::time::timeout(self.grace_period, active_run.lock()).await {
            Ok(_idle) => {
                info!("Graceful shutdown complete");
                true
            }
            Err(_) => {
                warn!(
                    grace_secs = self.grace_period.as_secs(),
                    "Backup run still active after grace period, exiting anyway"
                );
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        assert!(!coordinator.is_shutting_down());

        // A trigger that checks the flag, as the daily job does
        let seen = Arc::clone(&coordinator);
        let should_run = move || !seen.is_shutting_down();
        assert!(should_run());

        coordinator.trigger();
        assert!(coordinator.is_shutting_down());
        assert!(!should_run());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_active_run() {
        let coordinator = ShutdownCoordinator::new();
        let active = Arc::new(Mutex::new(()));

        let guard = Arc::clone(&active).lock_owned().await;
        let run = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(coordinator.shutdown(&active).await);
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_grace_period() {
        let coordinator = ShutdownCoordinator::new().with_grace_period(Duration::from_millis(20));
        let active = Mutex::new(());
        let _busy = active.lock().await;

        assert!(!coordinator.shutdown(&active).await);
    }
}
