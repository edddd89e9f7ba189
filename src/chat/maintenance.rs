//! Background maintenance for the transcript cache and lock map.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chat::coordinator::ConversationCoordinator;

/// Periodically drops stale transcripts and idle conversation locks.
pub struct CacheMaintenance {
    coordinator: Arc<ConversationCoordinator>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl CacheMaintenance {
    /// Create a maintenance worker.
    #[must_use]
    pub fn new(coordinator: Arc<ConversationCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a notifier that stops the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(interval = ?self.interval, "Starting cache maintenance");
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {
                    let removed = self.coordinator.run_maintenance();
                    if removed > 0 {
                        info!(removed, "Cache maintenance removed stale transcripts");
                    } else {
                        debug!("Cache maintenance found nothing to remove");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Cache maintenance shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtelierConfig;

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let coordinator =
            Arc::new(ConversationCoordinator::unconfigured("test", &AtelierConfig::default()).unwrap());
        let maintenance = CacheMaintenance::new(coordinator, Duration::from_secs(5));
        let shutdown = maintenance.shutdown_notifier();
        let handle = maintenance.spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.notify_one();
        handle.await.unwrap();
    }
}
