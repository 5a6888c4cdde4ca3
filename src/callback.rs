//! The `Callback` capability: a continuation with exactly two terminal
//! transitions, invoked at most once (spec.md §3 "Callback").
//!
//! Completion may happen synchronously, on the thread that registered the
//! callback, or asynchronously on a selector/worker thread later. Nothing in
//! this crate assumes either; see [`crate::iterate`] for the primitive that
//! copes with synchronous completion without recursing.

use crate::error::CoreError;

/// A continuation invoked at most once with either terminal transition.
///
/// Implementations must be idempotent against being invoked a second time
/// only insofar as they don't rely on the core to prevent it by construction
/// — callers of `succeeded`/`failed` are themselves responsible for calling
/// at most once (spec.md §3, P3 in §8).
pub trait Callback: Send {
    /// The operation completed without error.
    fn succeeded(self: Box<Self>);

    /// The operation failed with `cause`.
    fn failed(self: Box<Self>, cause: CoreError);
}

/// A boxed, type-erased callback.
pub type BoxCallback = Box<dyn Callback>;

/// Adapts a pair of closures into a [`Callback`].
pub struct FnCallback<S, F>
where
    S: FnOnce() + Send,
    F: FnOnce(CoreError) + Send,
{
    on_success: Option<S>,
    on_failure: Option<F>,
}

impl<S, F> std::fmt::Debug for FnCallback<S, F>
where
    S: FnOnce() + Send,
    F: FnOnce(CoreError) + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCallback").finish_non_exhaustive()
    }
}

impl<S, F> FnCallback<S, F>
where
    S: FnOnce() + Send,
    F: FnOnce(CoreError) + Send,
{
    /// Builds a callback from a success closure and a failure closure.
    pub fn new(on_success: S, on_failure: F) -> Self {
        Self {
            on_success: Some(on_success),
            on_failure: Some(on_failure),
        }
    }
}

impl<S, F> Callback for FnCallback<S, F>
where
    S: FnOnce() + Send,
    F: FnOnce(CoreError) + Send,
{
    fn succeeded(mut self: Box<Self>) {
        if let Some(f) = self.on_success.take() {
            f();
        }
    }

    fn failed(mut self: Box<Self>, cause: CoreError) {
        if let Some(f) = self.on_failure.take() {
            f(cause);
        }
    }
}
