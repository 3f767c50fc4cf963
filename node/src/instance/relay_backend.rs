use super::{InstanceFactory, InstanceSpec, ProxyInstance};
use crate::error::Result;
use async_trait::async_trait;
use common::BandwidthCounter;
use relay::RelayInstance;

/// Builds instances backed by the AEAD relay.
pub struct RelayFactory {
    udp_enabled: bool,
}

impl RelayFactory {
    pub fn new(udp_enabled: bool) -> Self {
        Self { udp_enabled }
    }
}

impl InstanceFactory for RelayFactory {
    fn create(&self, spec: &InstanceSpec) -> Result<Box<dyn ProxyInstance>> {
        let instance = RelayInstance::new(spec.port, &spec.method, &spec.password, self.udp_enabled)?;
        Ok(Box::new(instance))
    }
}

#[async_trait]
impl ProxyInstance for RelayInstance {
    async fn start(&mut self) -> Result<()> {
        RelayInstance::start(self).await?;
        Ok(())
    }

    async fn stop(&mut self) {
        RelayInstance::stop(self).await;
    }

    fn is_running(&self) -> bool {
        RelayInstance::is_running(self)
    }

    fn bandwidth(&self) -> &BandwidthCounter {
        RelayInstance::bandwidth(self)
    }

    fn set_credentials(&mut self, method: &str, password: &str) -> Result<()> {
        RelayInstance::set_credentials(self, method, password)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;

    fn spec(method: &str) -> InstanceSpec {
        InstanceSpec {
            user_id: 1,
            port: 0,
            method: method.to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn test_unknown_cipher_is_rejected() {
        let factory = RelayFactory::new(false);
        assert!(matches!(
            factory.create(&spec("rc4-md5")),
            Err(NodeError::Instance(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_instance_lifecycle() {
        let factory = RelayFactory::new(false);
        let mut instance = factory.create(&spec("aes-256-gcm")).unwrap();
        assert!(!instance.is_running());

        instance.start().await.unwrap();
        assert!(instance.is_running());

        instance.stop().await;
        assert!(!instance.is_running());
    }
}
