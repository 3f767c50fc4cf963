//! One synchronization tick: compare the enabled-user roster with the
//! running instances and bring the registry in line with it.
//!
//! Store reads at the start of a tick abort the whole tick on failure, before
//! the registry is touched. Everything after that (stops, starts, flushes) is
//! isolated per instance: a failure is logged and the tick moves on.

use crate::config::RestartPolicy;
use crate::error::{NodeError, Result};
use crate::instance::{InstanceFactory, InstanceHandle, InstanceSpec};
use crate::model::UserRecord;
use crate::quota;
use crate::registry::InstanceRegistry;
use crate::store::{NodeStore, bounded};
use crate::usage::UsageReporter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Instances with traffic more recent than this count as online.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    pub online: usize,
    pub running: usize,
    pub node_exhausted: bool,
}

struct RosterEntry {
    user: UserRecord,
    eligible: bool,
}

/// The enabled users of one tick, keyed by port and already checked for
/// integrity problems.
struct Roster {
    entries: BTreeMap<u16, RosterEntry>,
}

impl Roster {
    fn validate(users: Vec<UserRecord>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for user in users {
            let eligible = quota::is_eligible(&user)?;
            let port = user.port;
            let id = user.id;
            if let Some(previous) = entries.insert(port, RosterEntry { user, eligible }) {
                return Err(NodeError::DataIntegrity(format!(
                    "users {} and {} are both enabled on port {}",
                    previous.user.id, id, port
                )));
            }
        }
        Ok(Self { entries })
    }

    fn get(&self, port: u16) -> Option<&RosterEntry> {
        self.entries.get(&port)
    }

    fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }
}

pub struct Reconciler {
    registry: InstanceRegistry,
    factory: Arc<dyn InstanceFactory>,
    usage: UsageReporter,
    restart_policy: RestartPolicy,
    store_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        factory: Arc<dyn InstanceFactory>,
        restart_policy: RestartPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            registry: InstanceRegistry::new(),
            factory,
            usage: UsageReporter::new(store_timeout),
            restart_policy,
            store_timeout,
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn usage(&self) -> &UsageReporter {
        &self.usage
    }

    #[instrument(skip_all, fields(node_id = store.node_id()))]
    pub async fn run_cycle(&mut self, store: &dyn NodeStore) -> Result<CycleResult> {
        debug!("Get node bandwidth and traffic rate");
        let node_quota = bounded("node_quota", self.store_timeout, store.node_quota()).await?;
        self.usage.set_traffic_rate(node_quota.traffic_rate);

        if let Err(e) = bounded(
            "touch_heartbeat",
            self.store_timeout,
            store.touch_heartbeat(common::current_timestamp()),
        )
        .await
        {
            warn!("Failed to update heartbeat: {}", e);
        }

        let node_exhausted = node_quota.is_exhausted();
        if node_exhausted {
            warn!(
                consumed = node_quota.consumed,
                limit = node_quota.limit,
                "No more bandwidth left on this node"
            );
            self.evict_all(store).await;
        } else {
            debug!("Get users");
            let users = bounded("enabled_users", self.store_timeout, store.enabled_users()).await?;
            let roster = Roster::validate(users)?;
            info!("Fetched {} enabled users", roster.entries.len());

            self.purge(store, &roster).await;
            self.reconcile(store, &roster).await;
        }

        let online = self.count_online(store, Instant::now()).await;

        if let Err(e) = self.usage.flush_node_total(store).await {
            warn!(
                debt = self.usage.debt(),
                "Failed to update node bandwidth, carrying debt to next tick: {}", e
            );
        }

        Ok(CycleResult {
            online,
            running: self.registry.running_ports().len(),
            node_exhausted,
        })
    }

    /// Stop every instance and report what it still owes; used on shutdown.
    pub async fn shutdown(&mut self, store: &dyn NodeStore) {
        info!("Stopping {} instances", self.registry.len());
        self.evict_all(store).await;
        if let Err(e) = self.usage.flush_node_total(store).await {
            warn!(
                debt = self.usage.debt(),
                "Failed to update node bandwidth on shutdown: {}", e
            );
        }
    }

    /// Stop instances whose user left the roster or ran out of quota.
    /// Departed users are also flushed and dropped here so their port is
    /// free before anything is created.
    async fn purge(&mut self, store: &dyn NodeStore, roster: &Roster) {
        for port in self.registry.ports() {
            let owner = match self.registry.get_mut(port) {
                Some(handle) => handle.user_id(),
                None => continue,
            };

            match roster.get(port) {
                Some(entry) if entry.user.id == owner => {
                    if !entry.eligible
                        && let Some(handle) = self.registry.get_mut(port)
                    {
                        info!(user_id = owner, port, "Quota exhausted, stopping instance");
                        handle.stop().await;
                    }
                }
                Some(entry) => {
                    info!(
                        port,
                        previous = owner,
                        next = entry.user.id,
                        "Port changed owner, evicting instance"
                    );
                    self.evict(store, port).await;
                }
                None => {
                    info!(user_id = owner, port, "User left the roster");
                    self.retire(store, port).await;
                }
            }
        }
    }

    async fn reconcile(&mut self, store: &dyn NodeStore, roster: &Roster) {
        for entry in roster.entries() {
            let user = &entry.user;

            if !entry.eligible {
                if self.registry.contains(user.port) {
                    self.retire(store, user.port).await;
                }
                continue;
            }

            let restart_policy = self.restart_policy;
            match self.registry.get_mut(user.port) {
                Some(handle) if !handle.spec().same_credentials(user) => {
                    info!(
                        user_id = user.id,
                        port = user.port,
                        "Credentials changed, restarting instance"
                    );
                    if let Err(e) = handle.update_credentials(&user.method, &user.password).await {
                        error!(user_id = user.id, port = user.port, "Restart failed: {}", e);
                    }
                }
                Some(handle) if handle.is_running() => {
                    if restart_policy == RestartPolicy::Always
                        && let Err(e) = handle.restart().await
                    {
                        error!(user_id = user.id, port = user.port, "Restart failed: {}", e);
                    }
                }
                Some(handle) => {
                    if let Err(e) = handle.start().await {
                        error!(user_id = user.id, port = user.port, "Start failed: {}", e);
                    }
                }
                None => self.admit(user).await,
            }
        }
    }

    async fn admit(&mut self, user: &UserRecord) {
        info!(user_id = user.id, port = user.port, "Starting new instance");
        let spec = InstanceSpec::from(user);
        let instance = match self.factory.create(&spec) {
            Ok(instance) => instance,
            Err(e) => {
                error!(user_id = user.id, port = user.port, "Cannot create instance: {}", e);
                return;
            }
        };

        let mut handle = InstanceHandle::new(spec, instance);
        if let Err(e) = handle.start().await {
            error!(
                user_id = user.id,
                port = user.port,
                "Start failed, retrying next tick: {}", e
            );
        }
        self.registry.insert(handle);
    }

    /// Stop, flush and drop one instance. When the flush fails the stopped
    /// handle stays registered so its bytes are reported on a later tick.
    async fn retire(&mut self, store: &dyn NodeStore, port: u16) {
        let Some(handle) = self.registry.get_mut(port) else {
            return;
        };

        handle.stop().await;
        match self.usage.flush(store, handle).await {
            Ok(()) => {
                self.registry.remove(port);
                debug!(port, "Instance removed");
            }
            Err(e) => warn!(
                port,
                "Keeping stopped instance until its traffic is reported: {}", e
            ),
        }
    }

    /// Like [`Reconciler::retire`], but the handle is dropped even if its
    /// traffic could not be reported.
    async fn evict(&mut self, store: &dyn NodeStore, port: u16) {
        self.retire(store, port).await;
        if let Some(handle) = self.registry.remove(port) {
            let lost = handle.bandwidth().snapshot();
            error!(
                user_id = handle.user_id(),
                port,
                upload = lost.upload,
                download = lost.download,
                "Dropping instance with unreported traffic"
            );
        }
    }

    async fn evict_all(&mut self, store: &dyn NodeStore) {
        for port in self.registry.ports() {
            self.evict(store, port).await;
        }
    }

    /// Count recently active instances; quiet ones with pending bytes are
    /// flushed instead.
    async fn count_online(&mut self, store: &dyn NodeStore, now: Instant) -> usize {
        let mut online = 0;
        for handle in self.registry.iter() {
            if handle.bandwidth().is_active_within(ONLINE_WINDOW, now) {
                online += 1;
                continue;
            }

            if !handle.bandwidth().snapshot().is_empty()
                && let Err(e) = self.usage.flush(store, handle).await
            {
                warn!(
                    user_id = handle.user_id(),
                    port = handle.port(),
                    "Failed to report traffic: {}", e
                );
            }
        }
        online
    }
}
