//! `Connection` (spec.md §4.4): the protocol-facing consumer/producer bound
//! to an [`crate::endpoint::Endpoint`].
//!
//! A small trait the reactor calls into at defined lifecycle points, letting
//! the concrete implementation own all protocol logic. It names exactly the
//! lifecycle spec.md §4.4 lists (`on-open`, `on-fillable`, `on-close`) and
//! keeps protocol/transport specifics (HTTP parsing, TLS state) out of this
//! crate's scope entirely.

use std::sync::Arc;

use crate::endpoint::EndpointHandle;
use crate::error::CoreError;

/// A protocol-specific consumer/producer of an [`crate::endpoint::Endpoint`]'s bytes.
///
/// A `Connection` never reads concurrently from its own `Endpoint`: read
/// interest is single-shot, and the `Endpoint` will not invoke `on_fillable`
/// again until the connection re-arms via `fill_interested` (spec.md §3,
/// global invariants).
pub trait Connection: Send {
    /// Called once, after this connection is bound to `endpoint` and before
    /// its first read interest is armed. Implementations typically call
    /// `endpoint.fill_interested(..)` here to start the read loop, and
    /// should stash `endpoint` if they need to write later (e.g. from a
    /// worker thread finishing a response body).
    fn on_open(&mut self, endpoint: Arc<dyn EndpointHandle>);

    /// Called when the bound `Endpoint` reports `readable`. Implementations
    /// should loop fill → parse → (fill again | re-arm | close), expressed
    /// through an [`crate::iterate::Driver`] so a chain of synchronous
    /// completions can't recurse (spec.md §4.4, §4.5).
    fn on_fillable(&mut self);

    /// Final disposition. `cause` is `None` for a normal close, `Some(_)`
    /// for an error. Called at most once, before the connection's resources
    /// are released. Implementations must release any buffers they hold.
    fn on_close(&mut self, cause: Option<CoreError>);

    /// A short, stable name for the bound protocol (e.g. `"http/1.1"`),
    /// used only for diagnostics/logging.
    fn protocol(&self) -> &'static str {
        "unknown"
    }
}

/// Context handed to a [`ConnectionFactory`] when it is asked to build a new
/// [`Connection`] for a freshly bound `Endpoint`.
#[derive(Debug, Clone, Default)]
pub struct ConnectContext {
    /// The ALPN protocol the TLS layer negotiated, if any (drives HTTP/1 vs
    /// HTTP/2 selection in a real stack; opaque here).
    pub alpn: Option<String>,
    /// True if this connection was accepted (server-side); false if it was
    /// produced by an outbound `connect`.
    pub is_server: bool,
}

/// Embedder hook: builds the protocol-specific [`Connection`] for a newly
/// bound endpoint (spec.md §6 "Endpoint/Connection factories").
///
/// The reactor never constructs a concrete `Connection` itself — this is
/// the inversion that lets client and server stacks, and every wire
/// protocol, plug into the same core.
pub trait ConnectionFactory: Send + Sync {
    /// Builds a new connection bound to `endpoint`.
    fn new_connection(
        &self,
        endpoint: Arc<dyn EndpointHandle>,
        context: &ConnectContext,
    ) -> Box<dyn Connection>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A `Connection` that records lifecycle calls, for use across the
    /// crate's unit tests.
    pub struct RecordingConnection {
        pub opens: Arc<AtomicUsize>,
        pub fillables: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
        pub last_cause: Arc<std::sync::Mutex<Option<String>>>,
    }

    impl RecordingConnection {
        pub fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let opens = Arc::new(AtomicUsize::new(0));
            let fillables = Arc::new(AtomicUsize::new(0));
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    opens: opens.clone(),
                    fillables: fillables.clone(),
                    closes: closes.clone(),
                    last_cause: Arc::new(std::sync::Mutex::new(None)),
                },
                opens,
                fillables,
                closes,
            )
        }
    }

    impl Connection for RecordingConnection {
        fn on_open(&mut self, _endpoint: Arc<dyn EndpointHandle>) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fillable(&mut self) {
            self.fillables.fetch_add(1, Ordering::SeqCst);
        }

        fn on_close(&mut self, cause: Option<CoreError>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            *self.last_cause.lock().unwrap() = cause.map(|c| c.to_string());
        }
    }
}
