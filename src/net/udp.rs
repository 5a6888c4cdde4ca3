//! Minimal datagram channel support.
//!
//! spec.md §1 names "UDP/QUIC carriers" among the wire protocols the core
//! must eventually feed, but datagram sockets don't share TCP's
//! `Read`/`Write` contract (each `recv`/`send` is a whole datagram, not a
//! byte stream), so they don't implement [`crate::net::Channel`]. This is a
//! thin non-blocking wrapper a `ManagedSelector` can register directly;
//! building a `Content::Source`/`Sink` pair for a QUIC carrier on top of it
//! is left to the embedder (out of scope per spec.md §1).

use std::io;
use std::net::SocketAddr;

use mio::net::UdpSocket;

/// A non-blocking UDP socket registrable with a `ManagedSelector`.
#[derive(Debug)]
pub struct UdpChannel {
    inner: UdpSocket,
}

impl UdpChannel {
    /// Binds a new non-blocking UDP socket.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            inner: UdpSocket::bind(addr)?,
        })
    }

    /// Receives one datagram, or `Ok(None)` if none is ready.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sends one datagram, or `Ok(None)` if the socket would block.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<Option<usize>> {
        match self.inner.send_to(buf, target) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Access to the underlying `mio` socket, for registration with a
    /// selector's `Poll`.
    pub fn inner_mut(&mut self) -> &mut UdpSocket {
        &mut self.inner
    }
}
