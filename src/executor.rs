//! Dispatch policy for per-event work (spec.md §6 "dispatch-to-pool"):
//! whether a readiness callback runs inline on the selector thread or is
//! handed to a worker pool.
//!
//! A fixed set of threads pulling boxed work off a `crossbeam_channel`: the
//! core has no notion of what a connection does with a readiness
//! notification, so the work unit is an arbitrary boxed closure rather than
//! anything protocol-specific.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A boxed unit of per-event work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Where readiness callbacks run.
pub trait Executor: Send + Sync {
    /// Runs `task`, either inline or on a worker thread depending on the
    /// implementation.
    fn execute(&self, task: Task);
}

/// Runs every task synchronously on the calling (selector) thread.
///
/// The default for `dispatch_io = false` (spec.md §6): lowest latency for
/// handlers that don't block, at the cost of one slow handler stalling the
/// whole selector.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// A fixed pool of worker threads pulling tasks off an unbounded queue.
///
/// Used when `dispatch_io = true`: readiness callbacks run off the selector
/// thread, so a connection that does real work in `on_fillable` (parsing,
/// routing, a blocking downstream call) can't stall other connections
/// sharing the same selector.
pub struct ThreadPoolExecutor {
    sender: Sender<Task>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor").finish_non_exhaustive()
    }
}

impl ThreadPoolExecutor {
    /// Spawns `threads` workers, each looping on `recv` until the sender
    /// side is dropped.
    pub fn new(threads: usize) -> Arc<Self> {
        let (sender, receiver) = unbounded();
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver: Receiver<Task> = receiver.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("reactorio-worker-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread"),
            );
        }
        Arc::new(Self {
            sender,
            handles: Mutex::new(handles),
        })
    }

    /// Drops the sending half and joins every worker thread. Blocks until
    /// all in-flight tasks finish.
    pub fn shutdown(&self) {
        for handle in self.handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::error!("thread pool executor has no live workers; dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_executor_runs_synchronously() {
        let flag = AtomicUsize::new(0);
        let executor = InlineExecutor;
        executor.execute(Box::new(|| {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_pool_executor_runs_every_task() {
        // A single worker gives strict FIFO execution, so the final task
        // observing the full count is not racing any other in-flight task.
        let executor = ThreadPoolExecutor::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            executor.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let counter_check = counter.clone();
        executor.execute(Box::new(move || {
            let _ = done_tx.send(counter_check.load(Ordering::SeqCst));
        }));
        let observed = done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(observed, 50);
    }
}
