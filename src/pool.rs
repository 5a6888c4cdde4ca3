//! The byte-buffer pool capability (spec.md §9 "Global state").
//!
//! Exposed as an injected trait so embedders can substitute their own
//! allocator, and so tests can substitute a [`TrackingPool`] that asserts
//! zero leaks on shutdown — the test oracle spec.md calls out for P4
//! (retain balance).
//!
//! The default [`HeapPool`] buckets free buffers by power-of-two capacity,
//! the same growth strategy a single-owner growable buffer would use,
//! adapted here into a pool of reusable, fixed-capacity allocations indexed
//! by size class.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Acquires and releases the raw storage backing [`crate::chunk::Chunk`]s.
///
/// `acquire` returns a buffer with at least `min_capacity` bytes of
/// capacity (length 0; callers grow it with `Vec::resize`/`extend_from_slice`
/// as they fill it). `release` returns a buffer for reuse; pools are free to
/// drop it instead (e.g. once above a high-water mark).
pub trait BufferPool: Send + Sync {
    /// Obtain a buffer with at least `min_capacity` bytes of capacity.
    fn acquire(&self, min_capacity: usize) -> Vec<u8>;

    /// Return a buffer acquired from this pool (or any compatible one).
    fn release(&self, buf: Vec<u8>);
}

fn size_class(min_capacity: usize) -> usize {
    min_capacity.max(1).next_power_of_two()
}

/// A process-wide, size-classed free list of heap buffers.
#[derive(Debug, Default)]
pub struct HeapPool {
    bins: Mutex<BTreeMap<usize, Vec<Vec<u8>>>>,
    max_capacity: usize,
}

impl HeapPool {
    /// Builds a pool that discards buffers larger than `max_capacity`
    /// instead of retaining them (spec.md §6 `buffer-max`).
    pub fn new(max_capacity: usize) -> Self {
        Self {
            bins: Mutex::new(BTreeMap::new()),
            max_capacity,
        }
    }
}

impl BufferPool for HeapPool {
    fn acquire(&self, min_capacity: usize) -> Vec<u8> {
        let class = size_class(min_capacity);
        let mut bins = self.bins.lock().unwrap();
        if let Some(free) = bins.get_mut(&class) {
            if let Some(buf) = free.pop() {
                return buf;
            }
        }
        Vec::with_capacity(class)
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let cap = buf.capacity();
        if cap == 0 || cap > self.max_capacity {
            return;
        }
        let class = size_class(cap);
        let mut bins = self.bins.lock().unwrap();
        bins.entry(class).or_default().push(buf);
    }
}

/// Wraps any [`BufferPool`] and counts outstanding acquisitions, so tests
/// can assert the pool drained to zero after a connection closes.
#[derive(Debug)]
pub struct TrackingPool<P> {
    inner: P,
    outstanding: AtomicUsize,
}

impl<P: BufferPool> TrackingPool<P> {
    /// Wraps `inner`, starting at zero outstanding buffers.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Number of buffers acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Panics if any buffer acquired from this pool has not been released.
    pub fn assert_no_leaks(&self) {
        let n = self.outstanding();
        assert_eq!(n, 0, "{n} buffer(s) leaked: retain/release unbalanced");
    }
}

impl<P: BufferPool> BufferPool for TrackingPool<P> {
    fn acquire(&self, min_capacity: usize) -> Vec<u8> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(min_capacity)
    }

    fn release(&self, buf: Vec<u8>) {
        self.inner.release(buf);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_pool_reuses_released_buffers() {
        let pool = HeapPool::new(1 << 20);
        let buf = pool.acquire(100);
        let ptr = buf.as_ptr();
        pool.release(buf);
        let buf2 = pool.acquire(100);
        assert_eq!(buf2.as_ptr(), ptr, "expected the same allocation reused");
    }

    #[test]
    fn heap_pool_discards_oversized_buffers() {
        let pool = HeapPool::new(128);
        let buf = pool.acquire(1024);
        assert!(buf.capacity() >= 1024);
        pool.release(buf);
        // Too large to retain: nothing should be in the 1024/2048 bin.
        let buf2 = pool.acquire(1024);
        assert_eq!(buf2.len(), 0);
    }

    #[test]
    fn tracking_pool_counts_outstanding() {
        let pool = TrackingPool::new(HeapPool::new(1 << 20));
        let a = pool.acquire(64);
        let b = pool.acquire(64);
        assert_eq!(pool.outstanding(), 2);
        pool.release(a);
        assert_eq!(pool.outstanding(), 1);
        pool.release(b);
        pool.assert_no_leaks();
    }

    #[test]
    #[should_panic(expected = "leaked")]
    fn tracking_pool_flags_leaks() {
        let pool = TrackingPool::new(HeapPool::new(1 << 20));
        let _leaked = pool.acquire(64);
        pool.assert_no_leaks();
    }
}
