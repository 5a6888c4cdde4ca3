//! The Iterating Step Driver (spec.md §4.5): the primitive that turns
//! recursive async completion into bounded iteration.
//!
//! Without this, a "write, then on completion write again" chain
//! stack-overflows whenever completion happens synchronously (the write
//! finishes before the call that started it returns). The driver instead
//! detects a synchronous completion and loops at the *same* stack depth
//! instead of recursing into `process` again from inside the callback.
//!
//! This is the only loop-while-non-blocking-progress-is-possible mechanism
//! the core offers; echo connections, copy pumps (see
//! [`crate::content::copy`]), and write pipelines are all built on it.

use std::sync::{Arc, Mutex, Weak};

use crate::callback::{BoxCallback, Callback};
use crate::error::CoreError;

/// What a single [`Step::process`] call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// An asynchronous operation was started and `cb` was handed to it as
    /// its completion callback.
    Scheduled,
    /// Nothing to do right now; pause until the next external [`Driver::iterate`].
    Idle,
    /// The whole iteration is done, successfully.
    Succeeded,
}

/// User-supplied loop body for an [`Driver`].
///
/// `process` may be re-entered any number of times across the life of a
/// driver, but never recursively from within its own callback: see the
/// module docs.
pub trait Step: Send {
    /// Perform one unit of work. If it starts an async operation, hand `cb`
    /// to it and return [`StepResult::Scheduled`].
    fn process(&mut self, cb: BoxCallback) -> Result<StepResult, CoreError>;

    /// Called exactly once, when the loop ends with [`StepResult::Succeeded`].
    fn on_complete_success(&mut self) {}

    /// Called exactly once, when the loop ends with a failure (either a
    /// `process` error or a callback's `failed`).
    fn on_complete_failure(&mut self, _cause: &CoreError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Processing,
    Pending,
    Called,
    CalledFailed,
    Succeeded,
    Failed,
    Closed,
}

/// Drives a [`Step`] through bounded iteration.
///
/// Always held behind an `Arc` since the callback handed to the user's async
/// operation must be able to resume the driver from a different thread.
pub struct Driver<S: Step + 'static> {
    state: Mutex<State>,
    step: Mutex<S>,
    /// Cause stashed by a synchronous `failed()` received while `process` is
    /// still on the stack, for `process_once` to terminate with once the
    /// `step` guard that call holds is released.
    pending_failure: Mutex<Option<CoreError>>,
}

impl<S: Step + 'static> std::fmt::Debug for Driver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("state", &*self.state.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl<S: Step + 'static> Driver<S> {
    /// Builds a new, idle driver around `step`.
    pub fn new(step: S) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Idle),
            step: Mutex::new(step),
            pending_failure: Mutex::new(None),
        })
    }

    /// Builds a new, idle driver around a step that needs to resume the
    /// loop itself later (e.g. from a demand callback fired after
    /// `process` returned [`StepResult::Idle`]): `build` receives a
    /// [`Weak`] back-reference to the driver before the step is wrapped.
    pub fn new_with(build: impl FnOnce(Weak<Self>) -> S) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(State::Idle),
            step: Mutex::new(build(weak.clone())),
            pending_failure: Mutex::new(None),
        })
    }

    /// Resumes the loop if it is currently paused (`Idle`). A no-op if the
    /// driver is already running, terminal, or closed.
    pub fn iterate(self: &Arc<Self>) {
        let should_start = {
            let mut g = self.state.lock().unwrap();
            if *g == State::Idle {
                *g = State::Processing;
                true
            } else {
                false
            }
        };
        if should_start {
            self.run_loop();
        }
    }

    /// Aborts the driver. If no terminal hook has fired yet, fires
    /// `on_complete_failure` with [`CoreError::Closed`]. Idempotent.
    pub fn close(self: &Arc<Self>) {
        let fire = {
            let mut g = self.state.lock().unwrap();
            match *g {
                State::Succeeded | State::Failed | State::Closed => false,
                _ => {
                    *g = State::Closed;
                    true
                }
            }
        };
        if fire {
            self.step.lock().unwrap().on_complete_failure(&CoreError::Closed);
        }
    }

    /// True once the loop has ended, successfully or not.
    pub fn is_done(self: &Arc<Self>) -> bool {
        matches!(
            *self.state.lock().unwrap(),
            State::Succeeded | State::Failed | State::Closed
        )
    }

    fn run_loop(self: &Arc<Self>) {
        while self.process_once() {}
    }

    /// Runs one `process` call and decides whether the loop should continue
    /// immediately (a synchronous completion was recorded) or pause/stop.
    fn process_once(self: &Arc<Self>) -> bool {
        let cb: BoxCallback = Box::new(DriverCallback(self.clone()));
        let result = self.step.lock().unwrap().process(cb);

        match result {
            Err(e) => {
                self.terminate_failed(e);
                false
            }
            Ok(StepResult::Succeeded) => {
                self.terminate_succeeded();
                false
            }
            Ok(StepResult::Idle) => {
                let mut g = self.state.lock().unwrap();
                if *g == State::Processing {
                    *g = State::Idle;
                }
                false
            }
            Ok(StepResult::Scheduled) => {
                let mut g = self.state.lock().unwrap();
                match *g {
                    State::Processing => {
                        *g = State::Pending;
                        false
                    }
                    State::Called => {
                        // The scheduled op already completed, synchronously,
                        // while `process` was still on the stack above us.
                        // Loop again instead of recursing into it.
                        *g = State::Processing;
                        true
                    }
                    State::CalledFailed => {
                        // A synchronous `failed()` fired while `process` was
                        // still on the stack above us; `on_failed` only
                        // recorded it, since `step` was locked for the
                        // duration of that call. Terminate now that it
                        // isn't.
                        drop(g);
                        let cause = self
                            .pending_failure
                            .lock()
                            .unwrap()
                            .take()
                            .expect("CalledFailed state always carries a cause");
                        self.terminate_failed(cause);
                        false
                    }
                    State::Failed | State::Closed => false,
                    State::Idle | State::Pending | State::Succeeded => {
                        unreachable!("process_once re-entered in state {:?}", *g)
                    }
                }
            }
        }
    }

    fn on_succeeded(self: &Arc<Self>) {
        let resume = {
            let mut g = self.state.lock().unwrap();
            match *g {
                // Still inside the `process` call that scheduled us: record
                // it and let `process_once`'s caller loop.
                State::Processing => {
                    *g = State::Called;
                    false
                }
                // Genuinely asynchronous: re-enter the loop from here.
                State::Pending => {
                    *g = State::Processing;
                    true
                }
                State::Failed | State::Succeeded | State::Closed => false,
                State::Idle | State::Called => false,
            }
        };
        if resume {
            self.run_loop();
        }
    }

    fn on_failed(self: &Arc<Self>, cause: CoreError) {
        enum Action {
            None,
            RecordAndWait,
            ResumeTerminate,
        }
        let action = {
            let mut g = self.state.lock().unwrap();
            match *g {
                // Still inside the `process` call that scheduled us, which
                // holds the `step` lock `terminate_failed` needs: stash the
                // cause and let `process_once`'s caller terminate once that
                // guard is released.
                State::Processing => {
                    *g = State::CalledFailed;
                    Action::RecordAndWait
                }
                // Genuinely asynchronous: `step` isn't locked here, safe to
                // terminate directly.
                State::Pending => {
                    *g = State::Processing;
                    Action::ResumeTerminate
                }
                State::Failed | State::Succeeded | State::Closed => Action::None,
                State::Idle | State::Called | State::CalledFailed => Action::None,
            }
        };
        match action {
            Action::RecordAndWait => {
                *self.pending_failure.lock().unwrap() = Some(cause);
            }
            Action::ResumeTerminate => self.terminate_failed(cause),
            Action::None => {}
        }
    }

    fn terminate_succeeded(self: &Arc<Self>) {
        let fire = {
            let mut g = self.state.lock().unwrap();
            match *g {
                State::Succeeded | State::Failed | State::Closed => false,
                _ => {
                    *g = State::Succeeded;
                    true
                }
            }
        };
        if fire {
            self.step.lock().unwrap().on_complete_success();
        }
    }

    fn terminate_failed(self: &Arc<Self>, cause: CoreError) {
        let fire = {
            let mut g = self.state.lock().unwrap();
            match *g {
                State::Succeeded | State::Failed | State::Closed => false,
                _ => {
                    *g = State::Failed;
                    true
                }
            }
        };
        if fire {
            self.step.lock().unwrap().on_complete_failure(&cause);
        }
    }
}

struct DriverCallback<S: Step + 'static>(Arc<Driver<S>>);

impl<S: Step + 'static> Callback for DriverCallback<S> {
    fn succeeded(self: Box<Self>) {
        self.0.on_succeeded();
    }

    fn failed(self: Box<Self>, cause: CoreError) {
        self.0.on_failed(cause);
    }
}
