//! In-memory collaborators for exercising the control loop without a
//! database or real listeners.

use crate::error::{NodeError, Result};
use crate::instance::{InstanceFactory, InstanceSpec, ProxyInstance};
use crate::model::{NodeInfo, NodeQuota, TrafficEntry, UserRecord};
use crate::store::NodeStore;
use async_trait::async_trait;
use common::BandwidthCounter;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEvent {
    Created(u16),
    Start(u16),
    Stop(u16),
}

type EventLog = Arc<Mutex<Vec<InstanceEvent>>>;
type PortSet = Arc<Mutex<HashSet<u16>>>;

pub struct FakeInstance {
    port: u16,
    running: bool,
    failing_ports: PortSet,
    bandwidth: BandwidthCounter,
    events: EventLog,
}

impl FakeInstance {
    pub fn detached(port: u16) -> Self {
        Self {
            port,
            running: false,
            failing_ports: PortSet::default(),
            bandwidth: BandwidthCounter::new(),
            events: EventLog::default(),
        }
    }
}

#[async_trait]
impl ProxyInstance for FakeInstance {
    async fn start(&mut self) -> Result<()> {
        if self.failing_ports.lock().contains(&self.port) {
            return Err(NodeError::Instance(format!(
                "port {} already in use",
                self.port
            )));
        }
        self.events.lock().push(InstanceEvent::Start(self.port));
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) {
        self.events.lock().push(InstanceEvent::Stop(self.port));
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn bandwidth(&self) -> &BandwidthCounter {
        &self.bandwidth
    }

    fn set_credentials(&mut self, method: &str, _password: &str) -> Result<()> {
        if method == "unsupported" {
            return Err(NodeError::Instance(format!("unsupported cipher {}", method)));
        }
        Ok(())
    }
}

/// Records every lifecycle call and exposes each instance's counters by port.
#[derive(Default)]
pub struct FakeFactory {
    events: EventLog,
    counters: Mutex<HashMap<u16, BandwidthCounter>>,
    failing_ports: PortSet,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<InstanceEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn counter(&self, port: u16) -> BandwidthCounter {
        self.counters
            .lock()
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_start_on(&self, port: u16) {
        self.failing_ports.lock().insert(port);
    }

    pub fn allow_start_on(&self, port: u16) {
        self.failing_ports.lock().remove(&port);
    }
}

impl InstanceFactory for FakeFactory {
    fn create(&self, spec: &InstanceSpec) -> Result<Box<dyn ProxyInstance>> {
        if spec.method == "unsupported" {
            return Err(NodeError::Instance(format!(
                "unsupported cipher {}",
                spec.method
            )));
        }
        let bandwidth = BandwidthCounter::new();
        self.counters.lock().insert(spec.port, bandwidth.clone());
        self.events.lock().push(InstanceEvent::Created(spec.port));

        Ok(Box::new(FakeInstance {
            port: spec.port,
            running: false,
            failing_ports: self.failing_ports.clone(),
            bandwidth,
            events: self.events.clone(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    NodeQuota,
    EnabledUsers,
    Heartbeat,
    AddNodeBandwidth,
    RecordUserTraffic,
    InsertNodeInfo,
    InsertOnlineCount,
}

#[derive(Default)]
pub struct MemoryState {
    pub quota: Option<NodeQuota>,
    pub users: Vec<UserRecord>,
    pub traffic: Vec<TrafficEntry>,
    pub heartbeats: Vec<i64>,
    pub node_infos: Vec<NodeInfo>,
    pub online_counts: Vec<usize>,
    pub failing: HashSet<StoreOp>,
    pub delay: Option<Duration>,
}

pub struct MemoryStore {
    node_id: i32,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(quota: NodeQuota, users: Vec<UserRecord>) -> Self {
        Self {
            node_id: 1,
            state: Mutex::new(MemoryState {
                quota: Some(quota),
                users,
                ..MemoryState::default()
            }),
        }
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, MemoryState> {
        self.state.lock()
    }

    pub fn fail(&self, op: StoreOp) {
        self.state.lock().failing.insert(op);
    }

    pub fn recover(&self, op: StoreOp) {
        self.state.lock().failing.remove(&op);
    }

    pub fn set_users(&self, users: Vec<UserRecord>) {
        self.state.lock().users = users;
    }

    pub fn consumed(&self) -> u64 {
        self.state.lock().quota.map(|q| q.consumed).unwrap_or(0)
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if self.state.lock().failing.contains(&op) {
            return Err(NodeError::StoreUnavailable(sea_orm::DbErr::Custom(
                format!("injected failure in {:?}", op),
            )));
        }
        Ok(())
    }

    async fn delay(&self) {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    fn node_id(&self) -> i32 {
        self.node_id
    }

    async fn node_quota(&self) -> Result<NodeQuota> {
        self.delay().await;
        self.check(StoreOp::NodeQuota)?;
        self.state
            .lock()
            .quota
            .ok_or(NodeError::NodeNotFound(self.node_id))
    }

    async fn enabled_users(&self) -> Result<Vec<UserRecord>> {
        self.check(StoreOp::EnabledUsers)?;
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .filter(|user| user.enabled)
            .cloned()
            .collect())
    }

    async fn touch_heartbeat(&self, at: i64) -> Result<()> {
        self.check(StoreOp::Heartbeat)?;
        self.state.lock().heartbeats.push(at);
        Ok(())
    }

    async fn add_node_bandwidth(&self, bytes: u64) -> Result<()> {
        self.check(StoreOp::AddNodeBandwidth)?;
        let mut state = self.state.lock();
        let quota = state
            .quota
            .as_mut()
            .ok_or(NodeError::NodeNotFound(self.node_id))?;
        quota.consumed += bytes;
        Ok(())
    }

    async fn record_user_traffic(&self, entry: &TrafficEntry) -> Result<()> {
        self.check(StoreOp::RecordUserTraffic)?;
        {
            let mut state = self.state.lock();
            if let Some(user) = state.users.iter_mut().find(|u| u.id == entry.user_id) {
                user.upload += entry.upload;
                user.download += entry.download;
            }
            state.traffic.push(entry.clone());
        }
        // Committed; only the acknowledgement is slow.
        self.delay().await;
        Ok(())
    }

    async fn insert_node_info(&self, info: &NodeInfo) -> Result<()> {
        self.check(StoreOp::InsertNodeInfo)?;
        self.state.lock().node_infos.push(info.clone());
        Ok(())
    }

    async fn insert_online_count(&self, online: usize, _at: i64) -> Result<()> {
        self.check(StoreOp::InsertOnlineCount)?;
        self.state.lock().online_counts.push(online);
        Ok(())
    }
}

pub fn user(id: i32, port: u16, used: u64, ceiling: u64) -> UserRecord {
    UserRecord {
        id,
        port,
        method: "aes-256-gcm".to_string(),
        password: format!("pw-{}", id),
        enabled: true,
        upload: used,
        download: 0,
        transfer_ceiling: ceiling,
    }
}

pub fn quota(consumed: u64, limit: u64) -> NodeQuota {
    NodeQuota {
        consumed,
        limit,
        traffic_rate: 1.0,
    }
}
