//! The `Channel` trait: the opaque capability set an [`crate::endpoint::Endpoint`]
//! is built over.

use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::event::Source;

/// A stream- or datagram-oriented non-blocking transport.
///
/// Exactly the capability set spec.md §3 grants the core: register for
/// readiness (via [`mio::event::Source`]), read/write bytes, shut down, and
/// report addresses. The core never matches on a concrete transport type;
/// [`crate::endpoint::Endpoint`] is generic over this trait.
pub trait Channel: Read + Write + Source + Send + Debug {
    /// The address this end of the channel is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The address of the connected peer, if any.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Shuts down one or both halves of the channel at the OS level.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Takes and clears the channel's pending OS-level error, if any.
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}
