//! The `Channel` capability set (spec.md §3): what the core requires of a
//! transport, and nothing more.
//!
//! Concrete transports are wrapped behind a capability trait so the rest of
//! the crate never names a specific socket type; the surface is narrowed to
//! exactly the operations spec.md §3 lists for `Channel`
//! (`register-readiness, read-bytes, write-bytes, close, is-open,
//! local/remote address`) instead of the full `std::net::TcpStream` surface.

mod channel;
mod tcp;
mod udp;

pub use channel::Channel;
pub use tcp::{TcpChannel, TcpListenerChannel};
pub use udp::UdpChannel;
