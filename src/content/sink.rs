//! `Content::Sink` (spec.md §4.8): a push consumer of writes, at most one
//! outstanding, with an explicit terminal write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::callback::{BoxCallback, Callback};
use crate::endpoint::EndpointHandle;
use crate::error::CoreError;

/// A push consumer of byte views.
pub trait Sink: Send + Sync {
    /// Enqueues one write. `last = true` marks the terminal write; any
    /// write after it fails with [`CoreError::Usage`]. `cb` fires exactly
    /// once, when this write (not the whole stream) completes.
    fn write(&self, last: bool, view: Bytes, cb: BoxCallback);
}

/// A [`Sink`] that forwards writes to a bound [`EndpointHandle`].
///
/// This is the usual way a `Content::Sink` is obtained: a `Connection`'s
/// response/reply body is written through the `Endpoint` it was opened
/// with. `Endpoint::write` already enforces "one outstanding write"; this
/// adds the sink-level "no writes after the terminal one" rule.
pub struct EndpointSink {
    endpoint: Arc<dyn EndpointHandle>,
    terminal_written: AtomicBool,
}

impl std::fmt::Debug for EndpointSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSink").finish_non_exhaustive()
    }
}

impl EndpointSink {
    /// Builds a sink writing through `endpoint`.
    pub fn new(endpoint: Arc<dyn EndpointHandle>) -> Self {
        Self {
            endpoint,
            terminal_written: AtomicBool::new(false),
        }
    }
}

impl Sink for EndpointSink {
    fn write(&self, last: bool, view: Bytes, cb: BoxCallback) {
        if self.terminal_written.load(Ordering::SeqCst) {
            cb.failed(CoreError::Usage("write after terminal write"));
            return;
        }
        if last {
            self.terminal_written.store(true, Ordering::SeqCst);
        }
        self.endpoint.write(cb, vec![view]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::FnCallback;
    use crate::net::tcp::TcpListenerChannel;
    use mio::{Interest, Poll, Token};
    use std::net::TcpStream as StdTcpStream;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    fn bound_endpoint() -> (Poll, Arc<dyn EndpointHandle>, StdTcpStream) {
        let listener = TcpListenerChannel::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = StdTcpStream::connect(addr).unwrap();
        connector.set_nonblocking(false).unwrap();

        let poll = Poll::new().unwrap();
        let mut accepted = None;
        for _ in 0..1000 {
            if let Some((stream, _)) = listener.accept().unwrap() {
                accepted = Some(stream);
                break;
            }
        }
        let mut stream = accepted.expect("listener never accepted");
        poll.registry()
            .register(&mut stream, Token(0), Interest::READABLE | Interest::WRITABLE)
            .unwrap();
        let registry = Arc::new(poll.registry().try_clone().unwrap());
        let endpoint = crate::endpoint::Endpoint::new(stream, Token(0), registry, None);
        (poll, endpoint.handle(), connector)
    }

    #[test]
    fn a_write_after_the_terminal_write_is_rejected() {
        let (_poll, endpoint, _connector) = bound_endpoint();
        let sink = EndpointSink::new(endpoint);

        sink.write(true, Bytes::from_static(b"bye"), Box::new(FnCallback::new(
            || {},
            |_: CoreError| panic!("terminal write should not fail"),
        )));

        let rejected = Arc::new(StdAtomicBool::new(false));
        let rejected2 = rejected.clone();
        sink.write(
            false,
            Bytes::from_static(b"too late"),
            Box::new(FnCallback::new(
                || panic!("should not succeed"),
                move |cause| {
                    assert!(matches!(cause, CoreError::Usage(_)));
                    rejected2.store(true, Ordering::SeqCst);
                },
            )),
        );
        assert!(rejected.load(Ordering::SeqCst));
    }
}
