//! `ManagedSelector` (spec.md §4.1): one `mio::Poll` event loop pinned to a
//! single OS thread, owning a slab of bound endpoints and a cross-thread
//! action queue other threads use to register new ones.
//!
//! `Poll::poll` in a loop, a reserved wake token that drains a cross-thread
//! queue, a `slab::Slab` keyed by `Token` for O(1) dispatch: a single slab of
//! type-erased endpoints that drive themselves, fed by one generic action
//! queue used for registration rather than one queue per purpose.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::{Events, Poll, Registry, Token, Waker};
use slab::Slab;

use crate::executor::Executor;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// The self-driving half of a bound endpoint, as seen by its owning selector.
///
/// Implemented for `Endpoint<C>` for every channel type `C`; the selector
/// only ever holds `Arc<dyn ManagedEndpoint>`, so it never needs to be
/// generic over the channel type.
pub trait ManagedEndpoint: Send + Sync {
    /// Delivers a readable-readiness notification.
    fn on_readable(&self);
    /// Delivers a writable-readiness notification.
    fn on_writable(&self);
    /// Delivers an idle-timeout notification.
    fn on_idle_timeout(&self);
    /// Time since the endpoint last made read or write progress.
    fn idle_for(&self) -> Duration;
    /// The endpoint's configured idle timeout, if any.
    fn idle_timeout(&self) -> Option<Duration>;
    /// True once the endpoint has been closed; closed endpoints are pruned
    /// from the selector's slab on the next sweep.
    fn is_open(&self) -> bool;
}

/// A unit of work submitted to a selector's own thread (spec.md §4.2
/// "registration actions"): typically "register this channel, build its
/// endpoint and connection, and remember it under a fresh token".
pub type Action = Box<dyn FnOnce(&ActionContext<'_>) + Send>;

/// What an [`Action`] is given to do its work: the registry to register
/// with, and the slab to insert the resulting endpoint into.
pub struct ActionContext<'a> {
    /// The selector's `mio::Registry`, for registering new channels.
    pub registry: &'a Arc<Registry>,
    /// The selector's endpoint slab. An action reserves a vacant entry to
    /// learn its `Token` before registering, then inserts the endpoint.
    pub endpoints: &'a Mutex<Slab<Arc<dyn ManagedEndpoint>>>,
    /// The selector's own dispatch executor, for connections that want to
    /// hand expensive per-event work off a selector thread.
    pub executor: &'a Arc<dyn Executor>,
}

impl std::fmt::Debug for ActionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext").finish_non_exhaustive()
    }
}

/// One `mio::Poll` loop, pinned to the thread that calls [`ManagedSelector::run`].
pub struct ManagedSelector {
    poll: Mutex<Poll>,
    registry: Arc<Registry>,
    waker: Arc<Waker>,
    actions: Receiver<Action>,
    action_sender: Sender<Action>,
    endpoints: Mutex<Slab<Arc<dyn ManagedEndpoint>>>,
    executor: Arc<dyn Executor>,
    idle_scan_interval: Duration,
    running: AtomicBool,
}

impl std::fmt::Debug for ManagedSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSelector")
            .field("load", &self.load())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ManagedSelector {
    /// Builds a new selector. Does not start its loop; call [`ManagedSelector::run`]
    /// on the thread that should own it.
    pub fn new(executor: Arc<dyn Executor>, idle_scan_interval: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = Arc::new(poll.registry().try_clone()?);
        let waker = Arc::new(Waker::new(&registry, WAKE_TOKEN)?);
        let (action_sender, actions) = unbounded();
        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
            actions,
            action_sender,
            endpoints: Mutex::new(Slab::new()),
            executor,
            idle_scan_interval,
            running: AtomicBool::new(true),
        })
    }

    /// The registry new channels must be registered with before being
    /// handed to an [`Action`] (registration has to happen before the slab
    /// entry is reserved, so the token is known up front).
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A cloneable sender for submitting [`Action`]s from any thread. Each
    /// submission wakes the selector if it's blocked in `poll`.
    pub fn submitter(&self) -> ActionSubmitter {
        ActionSubmitter {
            sender: self.action_sender.clone(),
            waker: self.waker.clone(),
        }
    }

    /// How many endpoints this selector currently owns, for the manager's
    /// round-robin load balancing.
    pub fn load(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    /// Requests the loop in [`ManagedSelector::run`] return after its
    /// current iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.waker.wake();
    }

    /// Runs the event loop until [`ManagedSelector::shutdown`] is called.
    /// Blocks the calling thread.
    pub fn run(&self) {
        let mut events = Events::with_capacity(1024);
        let mut next_idle_scan = Instant::now() + self.idle_scan_interval;

        while self.running.load(Ordering::SeqCst) {
            let timeout = next_idle_scan.saturating_duration_since(Instant::now());
            let poll_result = self
                .poll
                .lock()
                .unwrap()
                .poll(&mut events, Some(timeout.max(Duration::from_millis(1))));

            if let Err(e) = poll_result {
                if e.kind() != io::ErrorKind::Interrupted {
                    tracing::error!(error = %e, "selector poll failed");
                }
                continue;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.drain_actions();
                    continue;
                }
                self.dispatch(event);
            }

            if Instant::now() >= next_idle_scan {
                self.scan_idle();
                next_idle_scan = Instant::now() + self.idle_scan_interval;
            }
        }
    }

    fn drain_actions(&self) {
        let ctx = ActionContext {
            registry: &self.registry,
            endpoints: &self.endpoints,
            executor: &self.executor,
        };
        while let Ok(action) = self.actions.try_recv() {
            action(&ctx);
        }
    }

    fn dispatch(&self, event: &mio::event::Event) {
        let endpoint = self
            .endpoints
            .lock()
            .unwrap()
            .get(event.token().0)
            .cloned();
        let Some(endpoint) = endpoint else { return };

        if event.is_readable() {
            let e = endpoint.clone();
            self.executor.execute(Box::new(move || e.on_readable()));
        }
        if event.is_writable() {
            self.executor.execute(Box::new(move || endpoint.on_writable()));
        }
    }

    fn scan_idle(&self) {
        let mut endpoints = self.endpoints.lock().unwrap();
        let mut expired = Vec::new();
        for (key, endpoint) in endpoints.iter() {
            if !endpoint.is_open() {
                expired.push(key);
                continue;
            }
            if let Some(timeout) = endpoint.idle_timeout() {
                if endpoint.idle_for() >= timeout {
                    endpoint.on_idle_timeout();
                }
            }
        }
        for key in expired {
            endpoints.try_remove(key);
        }
    }
}

/// A cheap, cloneable handle for submitting [`Action`]s to a [`ManagedSelector`]
/// from any thread (spec.md §4.2: the manager submits registrations to
/// whichever selector it assigns a new channel to).
#[derive(Clone)]
pub struct ActionSubmitter {
    sender: Sender<Action>,
    waker: Arc<Waker>,
}

impl std::fmt::Debug for ActionSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSubmitter").finish_non_exhaustive()
    }
}

impl ActionSubmitter {
    /// Submits `action` and wakes the owning selector's `poll` so it runs
    /// promptly rather than waiting for the next idle-scan timeout.
    pub fn submit(&self, action: Action) {
        if self.sender.send(action).is_ok() {
            let _ = self.waker.wake();
        }
    }
}
