//! `SelectorManager` (spec.md §4.2): owns a fixed pool of [`ManagedSelector`]s,
//! each pinned to its own OS thread, and assigns newly accepted/connected
//! channels to one of them round-robin.
//!
//! One accept thread feeds N selectors, each with its own `mio::Poll` on its
//! own OS thread; the manager hands each newly accepted channel to whichever
//! selector currently has the least load.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::{Interest, Token};

use crate::config::Options;
use crate::connection::{ConnectContext, ConnectionFactory};
use crate::endpoint::Endpoint;
use crate::executor::{Executor, InlineExecutor, ThreadPoolExecutor};
use crate::listener_hooks::ListenerRegistry;
use crate::net::{Channel, TcpChannel, TcpListenerChannel};
use crate::selector::{ActionContext, ManagedEndpoint, ManagedSelector};

/// Owns a pool of selectors and the listening sockets feeding them.
///
/// Held behind `Arc` so an accept thread and the caller can share it; build
/// one with [`SelectorManager::start`], which spawns every selector's run
/// loop on its own thread.
pub struct SelectorManager {
    selectors: Vec<Arc<ManagedSelector>>,
    next: AtomicUsize,
    listeners: Arc<ListenerRegistry>,
    executor: Arc<dyn Executor>,
    thread_pool: Option<Arc<ThreadPoolExecutor>>,
    options: Options,
    selector_threads: Mutex<Vec<JoinHandle<()>>>,
    accept_threads: Mutex<Vec<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl std::fmt::Debug for SelectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorManager")
            .field("selectors", &self.selectors.len())
            .finish_non_exhaustive()
    }
}

impl SelectorManager {
    /// Builds and starts `options.selectors` selectors, each running on its
    /// own thread, plus the dispatch executor `options.dispatch_io` selects.
    pub fn start(options: Options) -> std::io::Result<Arc<Self>> {
        let thread_pool = options
            .dispatch_io
            .then(|| ThreadPoolExecutor::new(options.dispatch_threads));
        let executor: Arc<dyn Executor> = match &thread_pool {
            Some(pool) => pool.clone(),
            None => Arc::new(InlineExecutor),
        };

        let mut selectors = Vec::with_capacity(options.selectors);
        let mut selector_threads = Vec::with_capacity(options.selectors);
        for index in 0..options.selectors.max(1) {
            let selector = Arc::new(ManagedSelector::new(
                executor.clone(),
                options.idle_scan_interval,
            )?);
            let s2 = selector.clone();
            let handle = thread::Builder::new()
                .name(format!("reactorio-selector-{index}"))
                .spawn(move || s2.run())
                .expect("failed to spawn selector thread");
            selectors.push(selector);
            selector_threads.push(handle);
        }

        Ok(Arc::new(Self {
            selectors,
            next: AtomicUsize::new(0),
            listeners: Arc::new(ListenerRegistry::new()),
            executor,
            thread_pool,
            options,
            selector_threads: Mutex::new(selector_threads),
            accept_threads: Mutex::new(Vec::new()),
        }))
    }

    /// Subscribes a [`crate::listener_hooks::ConnectionListener`] fired on
    /// every connection opened/closed by this manager.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// The selector currently carrying the least load, for round-robin
    /// assignment (spec.md §4.2 "balanced assignment").
    fn pick_selector(&self) -> Arc<ManagedSelector> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.selectors.len();
        self.selectors
            .iter()
            .cycle()
            .skip(start)
            .take(self.selectors.len())
            .min_by_key(|s| s.load())
            .expect("selectors is never empty")
            .clone()
    }

    /// Binds a listening socket and spawns a dedicated accept thread that
    /// hands every accepted connection to a selector chosen by
    /// [`SelectorManager::pick_selector`].
    ///
    /// Accepting happens off the selector threads entirely: the listener is
    /// polled on its own blocking-with-backoff loop rather than sharing a
    /// selector's `mio::Poll`.
    pub fn serve_tcp(
        self: &Arc<Self>,
        addr: SocketAddr,
        factory: Arc<dyn ConnectionFactory>,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListenerChannel::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let manager = self.clone();
        let stop2 = stop.clone();

        let handle = thread::Builder::new()
            .name("reactorio-acceptor".to_string())
            .spawn(move || {
                while !stop2.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok(Some((stream, _peer))) => {
                            manager.adopt_tcp(stream, true, factory.clone());
                        }
                        Ok(None) => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            thread::sleep(Duration::from_millis(5));
                        }
                    }
                }
            })
            .expect("failed to spawn acceptor thread");

        self.accept_threads.lock().unwrap().push((stop, handle));
        Ok(local_addr)
    }

    /// Registers an already-connected TCP channel with a selector and binds
    /// a connection to it (spec.md §4.2 "adopt"): the entry point for
    /// outbound `connect` as well as a caller who accepted a channel itself.
    pub fn adopt_tcp(
        self: &Arc<Self>,
        channel: TcpChannel,
        is_server: bool,
        factory: Arc<dyn ConnectionFactory>,
    ) {
        let selector = self.pick_selector();
        let idle_timeout = self.options.idle_timeout;
        let listeners = self.listeners.clone();

        selector.submitter().submit(Box::new(move |ctx: &ActionContext<'_>| {
            Self::register_and_bind(
                ctx,
                channel,
                idle_timeout,
                is_server,
                factory,
                listeners,
            );
        }));
    }

    fn register_and_bind(
        ctx: &ActionContext<'_>,
        mut channel: TcpChannel,
        idle_timeout: Option<Duration>,
        is_server: bool,
        factory: Arc<dyn ConnectionFactory>,
        listeners: Arc<ListenerRegistry>,
    ) {
        let mut endpoints = ctx.endpoints.lock().unwrap();
        let entry = endpoints.vacant_entry();
        let token = Token(entry.key());

        if let Err(e) = ctx.registry.register(
            &mut channel,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            tracing::error!(error = %e, "failed to register accepted channel");
            return;
        }

        let endpoint = Endpoint::new(channel, token, ctx.registry.clone(), idle_timeout);
        entry.insert(endpoint.clone());
        drop(endpoints);

        let context = ConnectContext {
            alpn: None,
            is_server,
        };
        let connection = factory.new_connection(endpoint.handle(), &context);
        listeners.fire_opened(connection.as_ref());
        endpoint.bind(connection);
    }

    /// Begins a non-blocking outbound connection (spec.md §4.2 "connect"):
    /// the channel is registered for `WRITABLE` readiness immediately, and
    /// promoted to a bound `Endpoint`/`Connection` once the OS reports the
    /// handshake finished. A connect that exceeds `options.connect_timeout`
    /// with no writable event is closed and never reaches `factory`.
    pub fn connect_tcp(
        self: &Arc<Self>,
        addr: SocketAddr,
        factory: Arc<dyn ConnectionFactory>,
    ) -> std::io::Result<()> {
        let channel = mio::net::TcpStream::connect(addr)?;
        let selector = self.pick_selector();
        let connect_timeout = self.options.connect_timeout;
        let idle_timeout = self.options.idle_timeout;
        let listeners = self.listeners.clone();

        selector.submitter().submit(Box::new(move |ctx: &ActionContext<'_>| {
            Self::register_pending_connect(
                ctx,
                channel,
                connect_timeout,
                idle_timeout,
                factory,
                listeners,
            );
        }));
        Ok(())
    }

    fn register_pending_connect(
        ctx: &ActionContext<'_>,
        mut channel: TcpChannel,
        connect_timeout: Duration,
        idle_timeout: Option<Duration>,
        factory: Arc<dyn ConnectionFactory>,
        listeners: Arc<ListenerRegistry>,
    ) {
        let mut endpoints = ctx.endpoints.lock().unwrap();
        let entry = endpoints.vacant_entry();
        let token = Token(entry.key());

        if let Err(e) = ctx.registry.register(&mut channel, token, Interest::WRITABLE) {
            tracing::error!(error = %e, "failed to register outbound connect");
            return;
        }

        entry.insert(Arc::new(PendingConnect {
            state: Mutex::new(ConnectState::Connecting {
                channel,
                started: Instant::now(),
            }),
            token,
            registry: ctx.registry.clone(),
            connect_timeout,
            idle_timeout,
            factory,
            listeners,
        }));
    }

    /// Stops every selector's run loop and accept thread, and joins them.
    /// Blocks until every thread has exited.
    pub fn shutdown(&self) {
        for (stop, _) in self.accept_threads.lock().unwrap().iter() {
            stop.store(true, Ordering::SeqCst);
        }
        for (_, handle) in self.accept_threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        for selector in &self.selectors {
            selector.shutdown();
        }
        for handle in self.selector_threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        if let Some(pool) = &self.thread_pool {
            pool.shutdown();
        }
    }
}

enum ConnectState {
    Connecting { channel: TcpChannel, started: Instant },
    Connected(Arc<Endpoint<TcpChannel>>),
    Failed,
}

/// The self-driving half of an in-flight outbound connect, occupying a slab
/// slot until the handshake resolves into a real [`Endpoint`] (or fails).
///
/// Delegating `ManagedEndpoint` to an inner state machine — rather than
/// swapping the slab entry itself once connected — keeps the slab's entry
/// type fixed for the life of the token, the same way `Endpoint::upgrade`
/// swaps the bound `Connection` in place without ever touching the slab.
struct PendingConnect {
    state: Mutex<ConnectState>,
    token: Token,
    registry: Arc<mio::Registry>,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    factory: Arc<dyn ConnectionFactory>,
    listeners: Arc<ListenerRegistry>,
}

impl PendingConnect {
    fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        let (mut channel, started) = match std::mem::replace(&mut *state, ConnectState::Failed) {
            ConnectState::Connecting { channel, started } => (channel, started),
            other => {
                *state = other;
                return;
            }
        };
        drop(state);

        match channel.take_error() {
            Ok(None) => {
                if let Err(e) =
                    self.registry
                        .reregister(&mut channel, self.token, Interest::READABLE | Interest::WRITABLE)
                {
                    tracing::error!(error = %e, "failed to reregister a newly connected channel");
                    return;
                }
                let endpoint = Endpoint::new(channel, self.token, self.registry.clone(), self.idle_timeout);
                *self.state.lock().unwrap() = ConnectState::Connected(endpoint.clone());

                let context = ConnectContext {
                    alpn: None,
                    is_server: false,
                };
                let connection = self.factory.new_connection(endpoint.handle(), &context);
                self.listeners.fire_opened(connection.as_ref());
                endpoint.bind(connection);
            }
            Ok(Some(e)) => {
                tracing::warn!(error = %e, elapsed = ?started.elapsed(), "outbound connect failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, elapsed = ?started.elapsed(), "outbound connect failed");
            }
        }
    }
}

impl ManagedEndpoint for PendingConnect {
    fn on_readable(&self) {
        if let ConnectState::Connected(endpoint) = &*self.state.lock().unwrap() {
            endpoint.on_readable();
        }
    }

    fn on_writable(&self) {
        let is_connecting = matches!(&*self.state.lock().unwrap(), ConnectState::Connecting { .. });
        if is_connecting {
            self.complete();
            return;
        }
        if let ConnectState::Connected(endpoint) = &*self.state.lock().unwrap() {
            endpoint.on_writable();
        }
    }

    fn on_idle_timeout(&self) {
        let mut state = self.state.lock().unwrap();
        match &*state {
            ConnectState::Connecting { .. } => {
                tracing::warn!(timeout = ?self.connect_timeout, "outbound connect timed out");
                *state = ConnectState::Failed;
            }
            ConnectState::Connected(endpoint) => endpoint.on_idle_timeout(),
            ConnectState::Failed => {}
        }
    }

    fn idle_for(&self) -> Duration {
        match &*self.state.lock().unwrap() {
            ConnectState::Connecting { started, .. } => started.elapsed(),
            ConnectState::Connected(endpoint) => endpoint.idle_for(),
            ConnectState::Failed => Duration::ZERO,
        }
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match &*self.state.lock().unwrap() {
            ConnectState::Connecting { .. } => Some(self.connect_timeout),
            ConnectState::Connected(endpoint) => endpoint.idle_timeout(),
            ConnectState::Failed => None,
        }
    }

    fn is_open(&self) -> bool {
        match &*self.state.lock().unwrap() {
            ConnectState::Connecting { .. } => true,
            ConnectState::Connected(endpoint) => endpoint.is_open(),
            ConnectState::Failed => false,
        }
    }
}
