use crate::health::NodeHealthReporter;
use crate::reconciler::Reconciler;
use crate::store::NodeStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drives the reconciler on a fixed interval until shutdown.
pub struct NodeServer {
    store: Arc<dyn NodeStore>,
    reconciler: Reconciler,
    health: NodeHealthReporter,
    interval: Duration,
}

impl NodeServer {
    pub fn new(
        store: Arc<dyn NodeStore>,
        reconciler: Reconciler,
        health: NodeHealthReporter,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            reconciler,
            health,
            interval,
        }
    }

    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Tick until `shutdown` resolves. A signal that arrives during a tick is
    /// honoured once the tick has finished.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            node_id = self.store.node_id(),
            interval_secs = self.interval.as_secs(),
            "Node control loop started"
        );
        tokio::pin!(shutdown);

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.reconciler.shutdown(self.store.as_ref()).await;
        info!("Node control loop stopped");
    }

    pub async fn tick(&mut self) {
        match self.reconciler.run_cycle(self.store.as_ref()).await {
            Ok(result) => {
                info!(
                    online = result.online,
                    running = result.running,
                    exhausted = result.node_exhausted,
                    "Tick finished"
                );
                self.health.report(self.store.as_ref(), result.online).await;
            }
            Err(e) if e.is_retryable() => warn!("Tick aborted, retrying next interval: {}", e),
            Err(e) => error!("Tick aborted: {}", e),
        }
    }
}
