mod relay_backend;

pub use relay_backend::RelayFactory;

use crate::error::Result;
use crate::model::UserRecord;
use async_trait::async_trait;
use common::BandwidthCounter;
use tracing::{info, warn};

/// A per-user proxy listener the control loop can start and stop.
#[async_trait]
pub trait ProxyInstance: Send {
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn bandwidth(&self) -> &BandwidthCounter;

    /// Takes effect on the next start.
    fn set_credentials(&mut self, method: &str, password: &str) -> Result<()>;
}

pub trait InstanceFactory: Send + Sync {
    fn create(&self, spec: &InstanceSpec) -> Result<Box<dyn ProxyInstance>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub user_id: i32,
    pub port: u16,
    pub method: String,
    pub password: String,
}

impl From<&UserRecord> for InstanceSpec {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.id,
            port: user.port,
            method: user.method.clone(),
            password: user.password.clone(),
        }
    }
}

impl InstanceSpec {
    pub fn same_credentials(&self, user: &UserRecord) -> bool {
        self.method == user.method && self.password == user.password
    }
}

/// Registry entry: the instance plus the parameters it was started with.
pub struct InstanceHandle {
    spec: InstanceSpec,
    instance: Box<dyn ProxyInstance>,
}

impl InstanceHandle {
    pub fn new(spec: InstanceSpec, instance: Box<dyn ProxyInstance>) -> Self {
        Self { spec, instance }
    }

    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    pub fn user_id(&self) -> i32 {
        self.spec.user_id
    }

    pub fn port(&self) -> u16 {
        self.spec.port
    }

    pub fn is_running(&self) -> bool {
        self.instance.is_running()
    }

    pub fn bandwidth(&self) -> &BandwidthCounter {
        self.instance.bandwidth()
    }

    pub async fn start(&mut self) -> Result<()> {
        self.instance.start().await?;
        info!(
            user_id = self.spec.user_id,
            port = self.spec.port,
            "Instance started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        if self.instance.is_running() {
            self.instance.stop().await;
            info!(
                user_id = self.spec.user_id,
                port = self.spec.port,
                "Instance stopped"
            );
        }
    }

    /// Always a full stop/start pair so new parameters are picked up.
    pub async fn restart(&mut self) -> Result<()> {
        self.instance.stop().await;
        self.start().await
    }

    /// Stop, swap in the new credentials, start again.
    pub async fn update_credentials(&mut self, method: &str, password: &str) -> Result<()> {
        self.instance.stop().await;
        if let Err(e) = self.instance.set_credentials(method, password) {
            warn!(
                user_id = self.spec.user_id,
                port = self.spec.port,
                "Rejected new credentials: {}",
                e
            );
            return Err(e);
        }
        self.spec.method = method.to_string();
        self.spec.password = password.to_string();
        self.start().await
    }
}
