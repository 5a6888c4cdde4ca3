//! `Content::Source` (spec.md §4.7): a lazy, non-restartable producer of
//! [`Chunk`]s with at most one outstanding demand.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::chunk::Chunk;
use crate::error::CoreError;

/// A one-shot "content may be available now" notification.
pub type DemandCallback = Box<dyn FnOnce() + Send>;

/// A lazy, finite producer of [`Chunk`]s.
///
/// Once a terminal chunk (last, or a fatal failure) has been delivered by
/// `read`, every subsequent `read` returns a retained handle to that same
/// chunk (spec.md §3: "returns the same terminal state on every subsequent
/// read").
pub trait Source: Send + Sync {
    /// Non-blocking read. `None` means no chunk is available right now and
    /// the caller should register a [`Source::demand`].
    fn read(&self) -> Option<Chunk>;

    /// Registers a one-shot notification for "content may be available".
    /// At most one demand may be outstanding; registering a second while
    /// one is pending is a programming error.
    fn demand(&self, cb: DemandCallback);

    /// Forces the source into a fatal-failed-terminal state. Any
    /// outstanding demand fires immediately.
    fn fail(&self, cause: CoreError);
}

struct Inner {
    queue: VecDeque<Chunk>,
    demand: Option<DemandCallback>,
    terminal: Option<Chunk>,
}

/// A [`Source`] fed by an external producer via [`QueueSource::push`] —
/// e.g. a `Connection` turning raw `Endpoint::fill` bytes into chunks for a
/// higher protocol layer to consume.
///
/// The demand/notify shape mirrors a producer-consumer handoff over a
/// waker, narrowed here to a single in-process queue plus one stored
/// callback rather than a cross-thread channel.
pub struct QueueSource {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for QueueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSource").finish_non_exhaustive()
    }
}

impl Default for QueueSource {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSource {
    /// An empty, not-yet-terminal source.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                demand: None,
                terminal: None,
            }),
        }
    }

    /// Enqueues `chunk` for a future `read`. Ignored once the source has
    /// already reached its terminal state. Fires any outstanding demand.
    pub fn push(&self, chunk: Chunk) {
        let cb = {
            let mut inner = self.inner.lock().unwrap();
            if inner.terminal.is_some() {
                return;
            }
            inner.queue.push_back(chunk);
            inner.demand.take()
        };
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl Source for QueueSource {
    fn read(&self) -> Option<Chunk> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(terminal) = &inner.terminal {
            return Some(terminal.retain());
        }
        match inner.queue.pop_front() {
            Some(chunk) => {
                if chunk.is_last() || chunk.failure_or_none().is_some() {
                    inner.terminal = Some(chunk.retain());
                }
                Some(chunk)
            }
            None => None,
        }
    }

    fn demand(&self, cb: DemandCallback) {
        let mut inner = self.inner.lock().unwrap();
        if inner.terminal.is_some() || !inner.queue.is_empty() {
            drop(inner);
            cb();
            return;
        }
        assert!(
            inner.demand.is_none(),
            "a demand is already outstanding on this source"
        );
        inner.demand = Some(cb);
    }

    fn fail(&self, cause: CoreError) {
        let cb = {
            let mut inner = self.inner.lock().unwrap();
            if inner.terminal.is_some() {
                return;
            }
            let chunk = Chunk::failure(true, cause);
            inner.terminal = Some(chunk.retain());
            inner.queue.clear();
            inner.demand.take()
        };
        if let Some(cb) = cb {
            cb();
        }
    }
}
