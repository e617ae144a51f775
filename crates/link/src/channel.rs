//! Datagram channel the engines run on.
//!
//! The channel is best effort. It may drop, corrupt, duplicate or reorder
//! anything handed to `send`. `recv` blocks for at most the channel's
//! configured timeout and then fails with `LinkError::Timeout`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::LinkError;

/// Largest UDP payload over IPv4. Anything longer cannot be sent at all.
pub const MAX_DATAGRAM: usize = 65_507;

#[async_trait]
pub trait Datagram: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<(), LinkError>;

    async fn recv(&self) -> Result<Vec<u8>, LinkError>;
}

/// UDP socket bound to an inbound port that always sends to one peer.
pub struct UdpChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    recv_timeout: Duration,
}

impl UdpChannel {
    pub async fn bind(
        local: SocketAddr,
        peer: SocketAddr,
        recv_timeout: Duration,
    ) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(local).await?;
        Self::from_socket(socket, peer, recv_timeout)
    }

    pub fn from_socket(
        socket: UdpSocket,
        peer: SocketAddr,
        recv_timeout: Duration,
    ) -> Result<Self, LinkError> {
        debug!("UDP channel bound to {} sending to {}", socket.local_addr()?, peer);
        Ok(Self {
            socket,
            peer,
            recv_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Datagram for UdpChannel {
    async fn send(&self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!("UDP send {} bytes to {}", bytes.len(), self.peer);
        self.socket.send_to(bytes, self.peer).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, LinkError> {
        // sized for any datagram, not just frames: the echo baseline sends whole payloads
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = timeout(self.recv_timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| LinkError::Timeout(self.recv_timeout))??;
        trace!("UDP recv {} bytes from {}", len, from);
        buf.truncate(len);
        Ok(buf)
    }
}
