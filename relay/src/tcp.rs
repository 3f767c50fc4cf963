use crate::address::Address;
use crate::cipher::MasterKey;
use crate::codec::{AeadCodec, MAX_PAYLOAD_SIZE};
use crate::error::{RelayError, Result};
use bytes::BytesMut;
use common::BandwidthCounter;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept clients until `cancel` fires. Connection tasks go on `tracker` so
/// the owner can wait for every one of them to end.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    master: MasterKey,
    bandwidth: BandwidthCounter,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let master = master.clone();
                        let bandwidth = bandwidth.clone();
                        let cancel = cancel.child_token();
                        tracker.spawn(async move {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {}
                                result = handle_connection(stream, master, bandwidth) => {
                                    if let Err(e) = result {
                                        debug!("Connection from {} closed: {}", addr, e);
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

#[instrument(skip_all)]
async fn handle_connection(
    stream: TcpStream,
    master: MasterKey,
    bandwidth: BandwidthCounter,
) -> Result<()> {
    let (mut sink, mut frames) = Framed::new(stream, AeadCodec::new(master)).split();

    let mut first = match tokio::time::timeout(HANDSHAKE_TIMEOUT, frames.next()).await {
        Ok(Some(frame)) => frame?,
        Ok(None) => return Ok(()),
        Err(_) => {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no target header received",
            )));
        }
    };
    let target = Address::read_from(&mut first)?;
    info!("Relaying to {}", target);

    let upstream = target.connect().await?;
    upstream.set_nodelay(true)?;
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let client_to_target = async {
        if !first.is_empty() {
            upstream_write.write_all(&first).await?;
            bandwidth.record_upload(first.len() as u64);
        }
        while let Some(chunk) = frames.next().await {
            let chunk = chunk?;
            upstream_write.write_all(&chunk).await?;
            bandwidth.record_upload(chunk.len() as u64);
        }
        upstream_write.shutdown().await?;
        Ok::<_, RelayError>(())
    };

    let target_to_client = async {
        let mut buf = BytesMut::with_capacity(MAX_PAYLOAD_SIZE);
        loop {
            buf.reserve(MAX_PAYLOAD_SIZE);
            let n = upstream_read.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            bandwidth.record_download(n as u64);
            sink.send(buf.split().freeze()).await?;
        }
        sink.close().await?;
        Ok::<_, RelayError>(())
    };

    tokio::try_join!(client_to_target, target_to_client)?;
    Ok(())
}
