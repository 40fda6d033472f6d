use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// UDP transport for RTP datagrams.
///
/// A thin wrapper over one [`UdpSocket`]. Cloning shares the socket, so a
/// sender and a receive loop can use the same local port.
///
/// This layer is address-only: it knows nothing about RTP. The sender
/// [`connect`](Self::connect)s it to the peer, the receiver reads from it
/// with [`recv_from`](Self::recv_from).
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind a socket on `addr`. Use port 0 for an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Fix the default destination used by [`send`](Self::send).
    pub fn connect(&self, peer: impl ToSocketAddrs) -> Result<()> {
        Ok(self.socket.connect(peer)?)
    }

    /// Send one datagram to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        Ok(self.socket.send(payload)?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// `None` blocks forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }
}
