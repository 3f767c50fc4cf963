use crate::model::NodeInfo;
use crate::store::{NodeStore, bounded};
use std::time::Duration;
use sysinfo::System;
use tracing::{info, instrument, warn};

/// Source of host uptime and load averages.
pub trait HostStats: Send + Sync {
    fn uptime_secs(&self) -> Option<u64>;

    /// 1, 5 and 15 minute load averages.
    fn load_average(&self) -> Option<[f64; 3]>;
}

pub struct SysinfoStats;

impl HostStats for SysinfoStats {
    fn uptime_secs(&self) -> Option<u64> {
        Some(System::uptime())
    }

    fn load_average(&self) -> Option<[f64; 3]> {
        let load = System::load_average();
        let sample = [load.one, load.five, load.fifteen];
        sample.iter().all(|v| v.is_finite()).then_some(sample)
    }
}

/// Writes one `ss_node_info` and one `ss_node_online_log` row per tick.
pub struct NodeHealthReporter {
    host: Box<dyn HostStats>,
    store_timeout: Duration,
}

impl NodeHealthReporter {
    pub fn new(host: Box<dyn HostStats>, store_timeout: Duration) -> Self {
        Self {
            host,
            store_timeout,
        }
    }

    /// Host data that cannot be read is reported as zero.
    pub fn sample(&self) -> NodeInfo {
        let uptime_secs = self.host.uptime_secs().unwrap_or_else(|| {
            warn!("Host uptime unavailable, reporting 0");
            0
        });
        let load = self.host.load_average().unwrap_or_else(|| {
            warn!("Load averages unavailable, reporting 0.00 0.00 0.00");
            [0.0; 3]
        });

        NodeInfo {
            uptime_secs,
            load,
            logged_at: common::current_timestamp(),
        }
    }

    /// Failures are logged; neither write blocks the other.
    #[instrument(skip(self, store))]
    pub async fn report(&self, store: &dyn NodeStore, online: usize) {
        let info = self.sample();
        info!(
            uptime = info.uptime_secs,
            load = %info.load_text(),
            "Updating node status"
        );
        if let Err(e) = bounded(
            "insert_node_info",
            self.store_timeout,
            store.insert_node_info(&info),
        )
        .await
        {
            warn!("Failed to update node status: {}", e);
        }

        info!("Updating online users count: {}", online);
        if let Err(e) = bounded(
            "insert_online_count",
            self.store_timeout,
            store.insert_online_count(online, info.logged_at),
        )
        .await
        {
            warn!("Failed to update online users count: {}", e);
        }
    }
}
