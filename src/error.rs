//! Error taxonomy shared by every layer of the reactor.
//!
//! Grounded on the error handling style of `Masorubka1-iscsi-client-rs`
//! (`thiserror`-derived enums with a `source` on the IO variant), adapted to
//! the five-way taxonomy spec.md §7 describes: closed, timeout, io,
//! protocol exhaustion, and usage errors.

use std::io;

use thiserror::Error;

/// Whether a [`CoreError`] is expected to recur if the caller retries, or is
/// final for the affected endpoint/source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The operation may succeed if retried later (e.g. idle timeout).
    Transient,
    /// The endpoint/connection/source this error was delivered on is done.
    Fatal,
}

/// The unified error type delivered through callbacks, `Content::Source`
/// reads, and fallible core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The endpoint was closed, locally or by the peer. Fatal.
    #[error("endpoint closed")]
    Closed,

    /// The endpoint was closed with an explicit application-supplied cause.
    /// Fatal.
    #[error("endpoint closed: {0}")]
    ClosedWithCause(String),

    /// The configured idle timeout elapsed with no read or write progress.
    /// Transient: the connection decides whether to close.
    #[error("idle timeout")]
    Timeout,

    /// An OS-level I/O error occurred on the channel. Fatal.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The bound `Connection` judged the peer's bytes invalid for its
    /// protocol. Fatal; raised by the connection, not the core.
    #[error("protocol exhaustion: {0}")]
    ProtocolExhaustion(String),

    /// A programmer error: overlapping reads/writes, a release without a
    /// matching retain, or a second concurrent demand. Fatal for the
    /// endpoint/source it was raised on.
    #[error("usage error: {0}")]
    Usage(&'static str),
}

impl CoreError {
    /// Classifies this error for callers that want to decide whether to
    /// keep going (see spec.md §4.7 "Transient failure chunk").
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Timeout => Severity::Transient,
            _ => Severity::Fatal,
        }
    }

    /// Shorthand for `severity() == Severity::Transient`.
    pub fn is_transient(&self) -> bool {
        self.severity() == Severity::Transient
    }
}

impl Clone for CoreError {
    fn clone(&self) -> Self {
        match self {
            CoreError::Closed => CoreError::Closed,
            CoreError::ClosedWithCause(s) => CoreError::ClosedWithCause(s.clone()),
            CoreError::Timeout => CoreError::Timeout,
            CoreError::Io(e) => CoreError::Io(io::Error::new(e.kind(), e.to_string())),
            CoreError::ProtocolExhaustion(s) => CoreError::ProtocolExhaustion(s.clone()),
            CoreError::Usage(s) => CoreError::Usage(s),
        }
    }
}
