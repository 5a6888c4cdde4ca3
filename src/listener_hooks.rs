//! Connection listener hooks (spec.md §4.4 "Listener hook"): global,
//! synchronous `connection-opened`/`connection-closed` observation points
//! used for statistics and connection-limit policies.
//!
//! Rust has no exceptions, so "listeners that throw are logged and
//! isolated" (spec.md §7) is implemented with [`std::panic::catch_unwind`]:
//! a panicking listener is logged via `tracing::error!` and skipped: it
//! must not affect other listeners or the connection whose transition
//! triggered it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::RwLock;

use crate::connection::Connection;

/// Observes connection open/close transitions.
///
/// Per spec.md §5, implementations must not block: invocation happens
/// synchronously within the lifecycle transition, on whichever thread
/// triggered it, and must use lock-free counters if they track statistics.
pub trait ConnectionListener: Send + Sync {
    /// Called strictly before the connection's first `on_fillable`.
    fn on_opened(&self, connection: &dyn Connection) {
        let _ = connection;
    }

    /// Called strictly after the connection's `on_close`.
    fn on_closed(&self, connection: &dyn Connection) {
        let _ = connection;
    }
}

/// A registry of [`ConnectionListener`]s, fired by `Endpoint`/`upgrade` at
/// the appropriate lifecycle points.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Box<dyn ConnectionListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry").finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a listener. Listeners cannot be unsubscribed; they are
    /// expected to live for the process/reactor's lifetime.
    pub fn subscribe(&self, listener: Box<dyn ConnectionListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Fires `on_opened` on every subscriber, isolating panics.
    pub fn fire_opened(&self, connection: &dyn Connection) {
        for listener in self.listeners.read().unwrap().iter() {
            Self::guarded(|| listener.on_opened(connection));
        }
    }

    /// Fires `on_closed` on every subscriber, isolating panics.
    pub fn fire_closed(&self, connection: &dyn Connection) {
        for listener in self.listeners.read().unwrap().iter() {
            Self::guarded(|| listener.on_closed(connection));
        }
    }

    fn guarded(f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "listener panicked with a non-string payload".to_string());
            tracing::error!(panic = %message, "connection listener panicked; isolating");
        }
    }
}
