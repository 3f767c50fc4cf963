use crate::error::{NodeError, Result};
use crate::instance::InstanceHandle;
use crate::model::TrafficEntry;
use crate::quota::rate_bytes;
use crate::store::{NodeStore, bounded};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Reports per-user traffic and keeps the node-wide debt: raw bytes already
/// reported for users but not yet added to the node's consumed total.
pub struct UsageReporter {
    traffic_rate: f64,
    debt: u64,
    store_timeout: Duration,
}

impl UsageReporter {
    pub fn new(store_timeout: Duration) -> Self {
        Self {
            traffic_rate: 1.0,
            debt: 0,
            store_timeout,
        }
    }

    pub fn set_traffic_rate(&mut self, rate: f64) {
        self.traffic_rate = rate;
    }

    pub fn debt(&self) -> u64 {
        self.debt
    }

    /// Report the handle's pending bytes.
    ///
    /// The counters are only cleared, and the debt only grows, once the store
    /// accepted the write; a failure leaves both untouched for the next try.
    #[instrument(skip_all, fields(user_id = handle.user_id(), port = handle.port()))]
    pub async fn flush(&mut self, store: &dyn NodeStore, handle: &InstanceHandle) -> Result<()> {
        let snapshot = handle.bandwidth().snapshot();
        if snapshot.is_empty() {
            debug!("Nothing to report");
            return Ok(());
        }

        let raw = snapshot.total().ok_or_else(|| {
            NodeError::DataIntegrity(format!(
                "pending traffic of user {} overflows",
                handle.user_id()
            ))
        })?;
        let debt = self.debt.checked_add(raw).ok_or_else(|| {
            NodeError::DataIntegrity(format!("node debt overflows: {} + {}", self.debt, raw))
        })?;

        let entry = TrafficEntry {
            user_id: handle.user_id(),
            upload: rate_bytes(snapshot.upload, self.traffic_rate)?,
            download: rate_bytes(snapshot.download, self.traffic_rate)?,
            rate: self.traffic_rate,
            logged_at: common::current_timestamp(),
        };

        info!(
            upload = snapshot.upload,
            download = snapshot.download,
            "Updating user traffic"
        );
        bounded(
            "record_user_traffic",
            self.store_timeout,
            store.record_user_traffic(&entry),
        )
        .await?;

        handle.bandwidth().deduct(&snapshot);
        self.debt = debt;
        Ok(())
    }

    /// Move the debt into the node's consumed total; retried whole on failure.
    #[instrument(skip_all, fields(debt = self.debt))]
    pub async fn flush_node_total(&mut self, store: &dyn NodeStore) -> Result<()> {
        if self.debt == 0 {
            return Ok(());
        }

        info!("Updating node bandwidth");
        bounded(
            "add_node_bandwidth",
            self.store_timeout,
            store.add_node_bandwidth(self.debt),
        )
        .await?;
        self.debt = 0;
        Ok(())
    }
}
