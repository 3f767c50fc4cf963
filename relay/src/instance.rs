use crate::cipher::{CipherKind, MasterKey};
use crate::error::{RelayError, Result};
use crate::tcp;
use crate::udp::{ASSOCIATION_IDLE_TIMEOUT, UdpRelay};
use common::BandwidthCounter;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

/// One user's relay listener bound to one port.
///
/// Credentials changed through [`RelayInstance::set_credentials`] take
/// effect on the next [`RelayInstance::start`]. Once [`RelayInstance::stop`]
/// returns, no task of the instance touches its bandwidth counter again.
pub struct RelayInstance {
    port: u16,
    cipher: CipherKind,
    password: String,
    udp_enabled: bool,
    bandwidth: BandwidthCounter,
    running: Option<RunningRelay>,
}

struct RunningRelay {
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: SocketAddr,
}

impl RelayInstance {
    pub fn new(port: u16, method: &str, password: &str, udp_enabled: bool) -> Result<Self> {
        Ok(Self {
            port,
            cipher: method.parse()?,
            password: password.to_string(),
            udp_enabled,
            bandwidth: BandwidthCounter::new(),
            running: None,
        })
    }

    pub fn set_credentials(&mut self, method: &str, password: &str) -> Result<()> {
        self.cipher = method.parse()?;
        self.password = password.to_string();
        Ok(())
    }

    pub fn cipher(&self) -> CipherKind {
        self.cipher
    }

    pub fn bandwidth(&self) -> &BandwidthCounter {
        &self.bandwidth
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    #[instrument(skip(self), fields(port = self.port, cipher = %self.cipher))]
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(RelayError::AlreadyRunning(self.port));
        }

        let master = MasterKey::derive(self.cipher, &self.password);
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        let local_addr = listener.local_addr()?;
        let udp_socket = if self.udp_enabled {
            Some(UdpSocket::bind(local_addr).await?)
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(tcp::accept_loop(
            listener,
            master.clone(),
            self.bandwidth.clone(),
            cancel.child_token(),
            tracker.clone(),
        ));
        if let Some(socket) = udp_socket {
            let relay = UdpRelay::new(
                socket,
                master,
                self.bandwidth.clone(),
                ASSOCIATION_IDLE_TIMEOUT,
            );
            tracker.spawn(relay.serve(cancel.child_token(), tracker.clone()));
        }

        info!("Relay listening on {}", local_addr);
        self.running = Some(RunningRelay {
            cancel,
            tracker,
            local_addr,
        });
        Ok(())
    }

    /// Cancel the listeners and every open connection, then wait for all of
    /// their tasks to finish.
    #[instrument(skip(self), fields(port = self.port))]
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;
        info!("Relay on {} stopped", running.local_addr);
    }
}

impl Drop for RelayInstance {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
