//! Blocking adaptors (spec.md §4.8): thin wrappers that convert callback
//! completion into thread park/unpark, for callers that would rather block
//! a thread than write a [`Step`](crate::iterate::Step). The cost — one
//! parked thread per outstanding operation — is the explicit trade-off for
//! not having to think in callbacks.

use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;

use crate::callback::FnCallback;
use crate::chunk::Chunk;
use crate::error::CoreError;

use super::sink::Sink;
use super::source::Source;

/// Blocks the calling thread until a [`Source`] has a chunk to hand back.
pub struct BlockingSource {
    inner: Arc<dyn Source>,
}

impl std::fmt::Debug for BlockingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSource").finish_non_exhaustive()
    }
}

impl BlockingSource {
    /// Wraps `inner` for blocking reads.
    pub fn new(inner: Arc<dyn Source>) -> Self {
        Self { inner }
    }

    /// Reads the next chunk, parking the calling thread if none is
    /// immediately available.
    pub fn read_blocking(&self) -> Chunk {
        loop {
            if let Some(chunk) = self.inner.read() {
                return chunk;
            }
            let thread = thread::current();
            self.inner.demand(Box::new(move || thread.unpark()));
            thread::park();
        }
    }
}

/// Blocks the calling thread until a [`Sink`] write completes.
pub struct BlockingSink {
    inner: Arc<dyn Sink>,
}

impl std::fmt::Debug for BlockingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSink").finish_non_exhaustive()
    }
}

impl BlockingSink {
    /// Wraps `inner` for blocking writes.
    pub fn new(inner: Arc<dyn Sink>) -> Self {
        Self { inner }
    }

    /// Writes one chunk, parking the calling thread until it completes.
    pub fn write_blocking(&self, last: bool, view: Bytes) -> Result<(), CoreError> {
        let outcome: Arc<Mutex<Option<Result<(), CoreError>>>> = Arc::new(Mutex::new(None));
        let thread = thread::current();

        let outcome_ok = outcome.clone();
        let thread_ok = thread.clone();
        let outcome_err = outcome.clone();
        let thread_err = thread;

        self.inner.write(
            last,
            view,
            Box::new(FnCallback::new(
                move || {
                    *outcome_ok.lock().unwrap() = Some(Ok(()));
                    thread_ok.unpark();
                },
                move |cause| {
                    *outcome_err.lock().unwrap() = Some(Err(cause));
                    thread_err.unpark();
                },
            )),
        );

        loop {
            if let Some(result) = outcome.lock().unwrap().take() {
                return result;
            }
            thread::park();
        }
    }
}
