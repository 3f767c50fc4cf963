use crate::address::Address;
use crate::cipher::MasterKey;
use crate::error::Result;
use bytes::{Bytes, BytesMut};
use common::BandwidthCounter;
use dashmap::DashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub(crate) const ASSOCIATION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Datagram relay for one user port. Each client address gets its own
/// outbound socket, dropped after `idle_timeout` without replies.
#[derive(Clone)]
pub(crate) struct UdpRelay {
    socket: Arc<UdpSocket>,
    master: MasterKey,
    bandwidth: BandwidthCounter,
    associations: Arc<DashMap<SocketAddr, Arc<UdpSocket>>>,
    idle_timeout: Duration,
}

impl UdpRelay {
    pub(crate) fn new(
        socket: UdpSocket,
        master: MasterKey,
        bandwidth: BandwidthCounter,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            socket: Arc::new(socket),
            master,
            bandwidth,
            associations: Arc::new(DashMap::new()),
            idle_timeout,
        }
    }

    pub(crate) fn association_count(&self) -> usize {
        self.associations.len()
    }

    pub(crate) async fn serve(self, cancel: CancellationToken, tracker: TaskTracker) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (n, client) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("UDP receive failed: {}", e);
                        continue;
                    }
                },
            };

            if let Err(e) = self.forward(&buf[..n], client, &cancel, &tracker).await {
                debug!("Dropping datagram from {}: {}", client, e);
            }
        }
    }

    async fn forward(
        &self,
        packet: &[u8],
        client: SocketAddr,
        cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<()> {
        let mut payload = Bytes::from(self.master.open_packet(packet)?);
        let target = Address::read_from(&mut payload)?.resolve().await?;

        let existing = self
            .associations
            .get(&client)
            .map(|entry| entry.value().clone());
        let outbound = match existing {
            Some(outbound) => outbound,
            None => {
                let bind_addr = if target.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let outbound = Arc::new(UdpSocket::bind(bind_addr).await?);
                self.associations.insert(client, outbound.clone());
                tracker.spawn(
                    self.clone()
                        .relay_replies(outbound.clone(), client, cancel.child_token()),
                );
                outbound
            }
        };

        outbound.send_to(&payload, target).await?;
        self.bandwidth.record_upload(payload.len() as u64);
        Ok(())
    }

    async fn relay_replies(
        self,
        outbound: Arc<UdpSocket>,
        client: SocketAddr,
        cancel: CancellationToken,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(self.idle_timeout, outbound.recv_from(&mut buf)) => result,
            };

            let (n, from) = match received {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    debug!("UDP association for {} failed: {}", client, e);
                    break;
                }
                Err(_) => break,
            };

            let mut plain = BytesMut::with_capacity(n + 19);
            Address::from(from).write_to(&mut plain);
            plain.extend_from_slice(&buf[..n]);

            match self.master.seal_packet(&plain) {
                Ok(packet) => {
                    if let Err(e) = self.socket.send_to(&packet, client).await {
                        debug!("Failed to return datagram to {}: {}", client, e);
                        continue;
                    }
                    self.bandwidth.record_download(n as u64);
                }
                Err(e) => warn!("Failed to seal datagram for {}: {}", client, e),
            }
        }

        self.associations.remove(&client);
        debug!("UDP association for {} closed", client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherKind;

    async fn spawn_echo_target() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    async fn start_relay(idle_timeout: Duration) -> (UdpRelay, SocketAddr, CancellationToken) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let relay = UdpRelay::new(
            socket,
            MasterKey::derive(CipherKind::ChaCha20IetfPoly1305, "udp-pw"),
            BandwidthCounter::new(),
            idle_timeout,
        );
        let cancel = CancellationToken::new();
        tokio::spawn(relay.clone().serve(cancel.clone(), TaskTracker::new()));
        (relay, addr, cancel)
    }

    async fn exchange(relay_addr: SocketAddr, target: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let master = MasterKey::derive(CipherKind::ChaCha20IetfPoly1305, "udp-pw");
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = BytesMut::new();
        Address::from(target).write_to(&mut request);
        request.extend_from_slice(payload);
        client
            .send_to(&master.seal_packet(&request).unwrap(), relay_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        master.open_packet(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_datagram_round_trip() {
        let target = spawn_echo_target().await;
        let (relay, relay_addr, cancel) = start_relay(ASSOCIATION_IDLE_TIMEOUT).await;

        let reply = exchange(relay_addr, target, b"ping").await;

        let mut expected = BytesMut::new();
        Address::from(target).write_to(&mut expected);
        expected.extend_from_slice(b"ping");
        assert_eq!(reply, expected.to_vec());

        tokio::time::timeout(Duration::from_secs(5), async {
            while relay.bandwidth.snapshot().download < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let snapshot = relay.bandwidth.snapshot();
        assert_eq!(snapshot.upload, 4);
        assert_eq!(snapshot.download, 4);
        assert_eq!(relay.association_count(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_idle_association_expires() {
        let target = spawn_echo_target().await;
        let (relay, relay_addr, cancel) = start_relay(Duration::from_millis(200)).await;

        exchange(relay_addr, target, b"once").await;
        assert_eq!(relay.association_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(relay.association_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_dropped() {
        let (relay, relay_addr, cancel) = start_relay(ASSOCIATION_IDLE_TIMEOUT).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0u8; 64], relay_addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(relay.association_count(), 0);
        assert!(relay.bandwidth.snapshot().is_empty());
        cancel.cancel();
    }
}
