mod sea_orm_store;

pub use sea_orm_store::SeaOrmStore;

use crate::error::{NodeError, Result};
use crate::model::{NodeInfo, NodeQuota, TrafficEntry, UserRecord};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Backing-store operations the control loop depends on, scoped to one node.
#[async_trait]
pub trait NodeStore: Send + Sync {
    fn node_id(&self) -> i32;

    /// Fails with `NodeNotFound` when the node row is missing.
    async fn node_quota(&self) -> Result<NodeQuota>;

    async fn enabled_users(&self) -> Result<Vec<UserRecord>>;

    async fn touch_heartbeat(&self, at: i64) -> Result<()>;

    /// Add `bytes` to the node's consumed total.
    async fn add_node_bandwidth(&self, bytes: u64) -> Result<()>;

    /// Append the traffic log row and bump the user's totals as one unit.
    async fn record_user_traffic(&self, entry: &TrafficEntry) -> Result<()>;

    async fn insert_node_info(&self, info: &NodeInfo) -> Result<()>;

    async fn insert_online_count(&self, online: usize, at: i64) -> Result<()>;
}

/// Run one store call with an upper bound on its duration.
///
/// A timeout does not mean the write was lost: it may have committed with
/// only the reply outstanding. Callers keep their counters on any error, so
/// such bytes are reported again on a later tick (at-least-once).
pub async fn bounded<T, F>(op: &'static str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::StoreTimeout(op)),
    }
}
