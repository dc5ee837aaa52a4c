//! Datagram transport shared by the broadcaster and the wall node.
//!
//! Every protocol packet travels over one broadcast-capable UDP socket
//! in both directions. [`DatagramLink`] abstracts it so the protocol
//! halves can also run over an in-process [`MemoryLink`].

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::error::NuvoError;
use crate::wire::{BROADCAST_ADDR, UDP_PORT};

/// A connectionless packet link with a fixed send destination.
#[async_trait]
pub trait DatagramLink: Send + Sync {
    /// Send one datagram to the link's destination.
    async fn send(&self, packet: &[u8]) -> Result<(), NuvoError>;

    /// Wait at most `wait` for one datagram. `Ok(None)` on timeout.
    async fn recv(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>, NuvoError>;
}

#[async_trait]
impl<T: DatagramLink + ?Sized> DatagramLink for Arc<T> {
    async fn send(&self, packet: &[u8]) -> Result<(), NuvoError> {
        (**self).send(packet).await
    }

    async fn recv(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>, NuvoError> {
        (**self).recv(buf, wait).await
    }
}

// ── UdpLink ──────────────────────────────────────────────────────

/// UDP socket plus destination. Sends are serialised by a lock so
/// concurrent producers never interleave on the socket.
pub struct UdpLink {
    socket: UdpSocket,
    target: SocketAddr,
    send_lock: tokio::sync::Mutex<()>,
}

impl UdpLink {
    /// Wrap an already-bound socket sending to `target`.
    pub fn new(socket: UdpSocket, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Bind `bind_ip` on the well-known port with broadcast enabled,
    /// sending to the broadcast address. Falls back to an OS-assigned
    /// port when the well-known one is taken.
    pub async fn bind_broadcast(bind_ip: IpAddr) -> Result<Self, NuvoError> {
        let socket = match UdpSocket::bind((bind_ip, UDP_PORT)).await {
            Ok(s) => {
                info!("UDP {bind_ip}:{UDP_PORT} bound (broadcast)");
                s
            }
            Err(e) => {
                warn!("UDP port {UDP_PORT} busy ({e}), using an OS-assigned port");
                UdpSocket::bind((bind_ip, 0)).await?
            }
        };
        socket.set_broadcast(true)?;
        Ok(Self::new(
            socket,
            SocketAddr::new(IpAddr::V4(BROADCAST_ADDR), UDP_PORT),
        ))
    }

    /// Bind exactly `addr` with broadcast enabled.
    pub async fn bind(addr: SocketAddr, target: SocketAddr) -> Result<Self, NuvoError> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self::new(socket, target))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NuvoError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl DatagramLink for UdpLink {
    async fn send(&self, packet: &[u8]) -> Result<(), NuvoError> {
        let _guard = self.send_lock.lock().await;
        self.socket.send_to(packet, self.target).await?;
        Ok(())
    }

    async fn recv(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>, NuvoError> {
        match tokio::time::timeout(wait, self.socket.recv_from(buf)).await {
            Ok(Ok(pair)) => Ok(Some(pair)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

// ── MemoryLink ───────────────────────────────────────────────────

/// In-process link: records what is sent and replays queued inbound
/// datagrams.
#[derive(Default)]
pub struct MemoryLink {
    sent: Mutex<Vec<Bytes>>,
    inbound: Mutex<VecDeque<Bytes>>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a datagram for the next `recv`.
    pub fn push_inbound(&self, packet: impl Into<Bytes>) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(packet.into());
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the sent log.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Source address reported for inbound memory datagrams.
const MEMORY_PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), UDP_PORT);

#[async_trait]
impl DatagramLink for MemoryLink {
    async fn send(&self, packet: &[u8]) -> Result<(), NuvoError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Bytes::copy_from_slice(packet));
        Ok(())
    }

    async fn recv(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>, NuvoError> {
        let next = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(pkt) => {
                let n = pkt.len().min(buf.len());
                buf[..n].copy_from_slice(&pkt[..n]);
                Ok(Some((n, MEMORY_PEER)))
            }
            None => {
                tokio::time::sleep(wait).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_link_records_and_replays() {
        let link = MemoryLink::new();
        link.send(&[1, 2, 3]).await.unwrap();
        assert_eq!(link.sent().len(), 1);

        link.push_inbound(vec![9u8, 8]);
        let mut buf = [0u8; 16];
        let (n, _) = link
            .recv(&mut buf, Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &[9, 8]);
        assert!(link
            .recv(&mut buf, Duration::from_millis(1))
            .await
            .unwrap()
            .is_none());
        assert_eq!(link.take_sent().len(), 1);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn udp_link_loopback() {
        let a = UdpLink::bind("127.0.0.1:0".parse().unwrap(), "127.0.0.1:9".parse().unwrap())
            .await
            .unwrap();
        let b_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b_sock.local_addr().unwrap();
        let b = UdpLink::new(b_sock, a.local_addr().unwrap());

        b.send(&[0x24, 0x24, 130, 0, 0]).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = a
            .recv(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(from, b_addr);
        assert!(a
            .recv(&mut buf, Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
    }
}
