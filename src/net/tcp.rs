//! `mio::net::TcpStream`/`TcpListener` as [`Channel`]s.
//!
//! `mio` only, not `std`: every channel registered with a
//! [`crate::selector::ManagedSelector`] must be non-blocking.

use std::io;
use std::net::{Shutdown, SocketAddr};

use mio::net::{TcpListener, TcpStream};

use super::channel::Channel;

/// A non-blocking TCP stream channel.
pub type TcpChannel = TcpStream;

impl Channel for TcpStream {
    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    #[inline]
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    #[inline]
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }
}

/// A listening socket capable of producing new [`TcpChannel`]s.
///
/// Not itself a `Channel` — the `SelectorManager`'s `accept` entry point
/// owns the listener directly rather than routing it through an `Endpoint`.
pub struct TcpListenerChannel {
    inner: TcpListener,
}

impl TcpListenerChannel {
    /// Binds a new non-blocking listening socket.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            inner: TcpListener::bind(addr)?,
        })
    }

    /// Accepts one pending connection, or `Ok(None)` if none is ready
    /// (`WouldBlock`).
    pub fn accept(&self) -> io::Result<Option<(TcpChannel, SocketAddr)>> {
        match self.inner.accept() {
            Ok((stream, addr)) => Ok(Some((stream, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Access to the underlying `mio` listener, for registration with a
    /// selector's `Poll`.
    pub fn inner_mut(&mut self) -> &mut TcpListener {
        &mut self.inner
    }
}
