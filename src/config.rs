//! Reactor-wide configuration (spec.md §6 "external interfaces"): selector
//! count, idle timeout, buffer sizing, and dispatch policy.
//!
//! Protocol-agnostic knobs only: no TLS config, no per-protocol ports. The
//! `Default` sizes the selector pool off the machine the way `mio`-based
//! servers typically do.

use std::time::Duration;

/// Tunables shared by a [`crate::selector_manager::SelectorManager`] and
/// the [`crate::selector::ManagedSelector`]s it owns.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of `ManagedSelector`s (and their dedicated OS threads).
    pub selectors: usize,
    /// Depth of the accept queue handed to the OS listen socket.
    pub accept_backlog: u32,
    /// Idle timeout applied to every accepted/connected `Endpoint`, unless
    /// overridden per-connection. `None` disables idle timeout scanning.
    pub idle_timeout: Option<Duration>,
    /// How often each selector sweeps its endpoints for idle timeout.
    pub idle_scan_interval: Duration,
    /// Smallest size class a `BufferPool` allocates.
    pub buffer_min: usize,
    /// Largest size class a `BufferPool` retains; larger requests bypass
    /// the pool and are freed directly on release.
    pub buffer_max: usize,
    /// Timeout applied to outbound `connect` attempts.
    pub connect_timeout: Duration,
    /// If true, readiness callbacks are dispatched to a worker pool rather
    /// than run inline on the selector thread (spec.md §5's scheduling
    /// model; default is inline, since hand-off costs a context switch per
    /// event).
    pub dispatch_io: bool,
    /// Worker threads backing `dispatch_io`. Ignored when `dispatch_io` is
    /// false.
    pub dispatch_threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            selectors: parallelism.max(1),
            accept_backlog: 1024,
            idle_timeout: Some(Duration::from_secs(30)),
            idle_scan_interval: Duration::from_secs(1),
            buffer_min: 1024,
            buffer_max: 64 * 1024,
            connect_timeout: Duration::from_secs(10),
            dispatch_io: false,
            dispatch_threads: parallelism.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selector_count_is_at_least_one() {
        assert!(Options::default().selectors >= 1);
    }
}
