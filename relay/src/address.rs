use crate::error::{RelayError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use tokio::net::{TcpStream, lookup_host};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Target address carried at the start of every client stream and datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Socket(SocketAddr),
    Domain(String, u16),
}

impl Address {
    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(RelayError::InvalidAddress("empty header".to_string()));
        }

        match buf.get_u8() {
            ATYP_IPV4 => {
                ensure_remaining(buf, 4 + 2)?;
                let ip = Ipv4Addr::from(buf.get_u32());
                let port = buf.get_u16();
                Ok(Address::Socket(SocketAddr::V4(SocketAddrV4::new(ip, port))))
            }
            ATYP_IPV6 => {
                ensure_remaining(buf, 16 + 2)?;
                let ip = Ipv6Addr::from(buf.get_u128());
                let port = buf.get_u16();
                Ok(Address::Socket(SocketAddr::V6(SocketAddrV6::new(
                    ip, port, 0, 0,
                ))))
            }
            ATYP_DOMAIN => {
                ensure_remaining(buf, 1)?;
                let len = buf.get_u8() as usize;
                ensure_remaining(buf, len + 2)?;
                let host = String::from_utf8(buf.split_to(len).to_vec())
                    .map_err(|e| RelayError::InvalidAddress(e.to_string()))?;
                let port = buf.get_u16();
                Ok(Address::Domain(host, port))
            }
            other => Err(RelayError::InvalidAddress(format!(
                "unknown address type {:#04x}",
                other
            ))),
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Address::Socket(SocketAddr::V4(addr)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Socket(SocketAddr::V6(addr)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Domain(host, port) => {
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(host.len() as u8);
                buf.put_slice(host.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    pub async fn connect(&self) -> std::io::Result<TcpStream> {
        match self {
            Address::Socket(addr) => TcpStream::connect(addr).await,
            Address::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        }
    }

    pub async fn resolve(&self) -> Result<SocketAddr> {
        match self {
            Address::Socket(addr) => Ok(*addr),
            Address::Domain(host, port) => lookup_host((host.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| RelayError::InvalidAddress(format!("{} did not resolve", host))),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

fn ensure_remaining(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(RelayError::InvalidAddress(format!(
            "truncated header, need {} more bytes",
            needed - buf.remaining()
        )));
    }
    Ok(())
}
