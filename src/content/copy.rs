//! `copy(source, sink, cb)` (spec.md §4.8): pumps a [`Source`] into a
//! [`Sink`] one chunk at a time, built on the Iterating Step Driver so a
//! run of synchronously-completing writes can't recurse.

use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::callback::{BoxCallback, Callback};
use crate::error::CoreError;
use crate::iterate::{Driver, Step, StepResult};

use super::sink::Sink;
use super::source::Source;

struct CopyStep {
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    final_cb: Option<BoxCallback>,
    driver: Weak<Driver<CopyStep>>,
    last_written: bool,
}

impl Step for CopyStep {
    fn process(&mut self, cb: BoxCallback) -> Result<StepResult, CoreError> {
        if self.last_written {
            return Ok(StepResult::Succeeded);
        }

        match self.source.read() {
            Some(chunk) => {
                if let Some(cause) = chunk.failure_or_none() {
                    if chunk.is_last() {
                        let cause = cause.clone();
                        chunk.release();
                        return Err(cause);
                    }
                    // Transient: the Content Source contract lets a reader
                    // ignore this and keep going (spec.md §8's "transient
                    // failure chunk" property).
                    chunk.release();
                    cb.succeeded();
                    return Ok(StepResult::Scheduled);
                }

                let last = chunk.is_last();
                let bytes = Bytes::copy_from_slice(chunk.byte_view());
                chunk.release();
                if last {
                    self.last_written = true;
                }
                self.sink.write(last, bytes, cb);
                Ok(StepResult::Scheduled)
            }
            None => {
                let driver = self
                    .driver
                    .upgrade()
                    .expect("copy driver dropped while still in flight");
                // The strong clone captured here is what keeps the driver
                // alive while parked: the source's stored demand callback
                // is now the only owner until it fires.
                self.source
                    .demand(Box::new(move || driver.iterate()));
                Ok(StepResult::Idle)
            }
        }
    }

    fn on_complete_success(&mut self) {
        if let Some(cb) = self.final_cb.take() {
            cb.succeeded();
        }
    }

    fn on_complete_failure(&mut self, cause: &CoreError) {
        if let Some(cb) = self.final_cb.take() {
            cb.failed(cause.clone());
        }
    }
}

/// Pumps `source` into `sink` until the source's last chunk has been
/// written, then completes `cb`. A fatal failure chunk from `source`, or a
/// write failure from `sink`, ends the copy and fails `cb` with that cause.
pub fn copy(source: Arc<dyn Source>, sink: Arc<dyn Sink>, cb: BoxCallback) {
    let driver = Driver::new_with(|driver| CopyStep {
        source,
        sink,
        final_cb: Some(cb),
        driver,
        last_written: false,
    });
    driver.iterate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{Callback, FnCallback};
    use crate::chunk::Chunk;
    use crate::content::source::QueueSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        received: Mutex<Vec<u8>>,
        saw_last: AtomicBool,
    }

    impl Sink for RecordingSink {
        fn write(&self, last: bool, view: Bytes, cb: BoxCallback) {
            self.received.lock().unwrap().extend_from_slice(&view);
            if last {
                self.saw_last.store(true, Ordering::SeqCst);
            }
            cb.succeeded();
        }
    }

    #[test]
    fn copy_pumps_every_chunk_then_completes() {
        let source = Arc::new(QueueSource::new());
        source.push(Chunk::of(b"hello, ".to_vec(), false, None));
        source.push(Chunk::of(b"world".to_vec(), false, None));
        source.push(Chunk::end_of_stream());

        let sink = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            saw_last: AtomicBool::new(false),
        });

        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        copy(
            source,
            sink.clone(),
            Box::new(FnCallback::new(
                move || done2.store(true, Ordering::SeqCst),
                |_: CoreError| panic!("copy should not fail"),
            )),
        );

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(&*sink.received.lock().unwrap(), b"hello, world");
        assert!(sink.saw_last.load(Ordering::SeqCst));
    }

    #[test]
    fn copy_waits_on_demand_when_source_is_not_yet_ready() {
        let source = Arc::new(QueueSource::new());
        let sink = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            saw_last: AtomicBool::new(false),
        });

        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        copy(
            source.clone(),
            sink.clone(),
            Box::new(FnCallback::new(
                move || done2.store(true, Ordering::SeqCst),
                |_: CoreError| panic!("copy should not fail"),
            )),
        );
        assert!(!done.load(Ordering::SeqCst));

        source.push(Chunk::end_of_stream());
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn a_fatal_failure_chunk_ends_the_copy_with_failure() {
        let source = Arc::new(QueueSource::new());
        source.fail(CoreError::ProtocolExhaustion("bad frame".into()));

        let sink = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            saw_last: AtomicBool::new(false),
        });

        let failed = Arc::new(AtomicBool::new(false));
        let failed2 = failed.clone();
        copy(
            source,
            sink,
            Box::new(FnCallback::new(
                || panic!("copy should not succeed"),
                move |_| failed2.store(true, Ordering::SeqCst),
            )),
        );
        assert!(failed.load(Ordering::SeqCst));
    }
}
