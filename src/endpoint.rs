//! `Endpoint` (spec.md §4.3): the non-blocking read/write surface bound to
//! one [`Channel`] and driven by exactly one [`crate::selector::ManagedSelector`].
//!
//! Single-owner mutable state behind a `Mutex`, re-registering interest
//! after every readiness event, shaped around spec.md's explicit callback
//! contract: `fill`/`write` never block and report completion through a
//! [`Callback`] rather than returning data synchronously past the first
//! call.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::{Interest, Registry, Token};

use crate::callback::{BoxCallback, Callback};
use crate::connection::Connection;
use crate::error::CoreError;
use crate::listener_hooks::ListenerRegistry;
use crate::net::Channel;

/// The type-erased capability an [`Endpoint`] exposes to its bound
/// [`Connection`] (spec.md §9: "Connection holds a non-owning handle to its
/// Endpoint"). Type-erasure here — rather than a generic parameter on
/// `Connection` — is what lets `Connection` be a plain trait object: the
/// `Endpoint<C>` behind it is private to the selector that owns it.
pub trait EndpointHandle: Send + Sync {
    /// Arms single-shot read interest: `on_fillable` (via `cb`) fires the
    /// next time the channel is readable, then interest is cleared again.
    /// Fails with [`CoreError::Usage`] if a read is already pending.
    fn fill_interested(&self, cb: BoxCallback);

    /// Performs one non-blocking read into `buf`.
    ///
    /// Returns `Ok(n)` for `n` bytes read, `Ok(-1)` if the peer has shut
    /// down its write side (EOF), or `Ok(0)` if no data is available right
    /// now (spec.md §4.3).
    fn fill(&self, buf: &mut [u8]) -> Result<isize, CoreError>;

    /// Queues `buffers` for non-blocking write, invoking `cb` once every
    /// byte has been accepted by the OS or the write fails. Fails `cb`
    /// immediately with [`CoreError::Usage`] if a write is already pending.
    fn write(&self, cb: BoxCallback, buffers: Vec<Bytes>);

    /// Shuts down the channel's write half without closing the read half.
    fn shutdown_output(&self);

    /// Closes the endpoint with no specific cause.
    fn close(&self);

    /// Closes the endpoint, delivering `cause` to any pending callbacks.
    fn close_with_cause(&self, cause: CoreError);

    /// False once `close`/`close_with_cause` has run.
    fn is_open(&self) -> bool;

    /// Swaps the bound [`Connection`] for `new_connection`, firing the old
    /// connection's `on_close(None)`, the listener `closed`/`opened` hooks,
    /// and the new connection's `on_open` (spec.md §4.4 "Upgrade").
    ///
    /// Any read interest armed by the outgoing connection is dropped
    /// silently, not failed: the outgoing connection is being decommissioned
    /// and must not be invoked again.
    fn upgrade(&self, new_connection: Box<dyn Connection>, listeners: &ListenerRegistry);

    /// The local socket address, if the channel has one.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The peer socket address, if the channel has one.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

enum WriteState {
    Idle,
    Pending(WritePending),
}

struct WritePending {
    queue: VecDeque<Bytes>,
    callback: Option<BoxCallback>,
}

/// One non-blocking read/write surface over a [`Channel`], owned by the
/// [`crate::selector::ManagedSelector`] it is registered with.
///
/// Always held as `Arc<Endpoint<C>>`: [`Endpoint::handle`] requires it to
/// hand out an `Arc<dyn EndpointHandle>` to the bound `Connection`.
pub struct Endpoint<C: Channel> {
    channel: Mutex<C>,
    token: Token,
    registry: Arc<Registry>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    idle_timeout: Option<Duration>,
    read_interest: Mutex<Option<BoxCallback>>,
    write_state: Mutex<WriteState>,
    connection: Mutex<Option<Box<dyn Connection>>>,
    open: AtomicBool,
    self_weak: Weak<Endpoint<C>>,
}

impl<C: Channel> fmt::Debug for Endpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("token", &self.token)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: Channel + 'static> Endpoint<C> {
    /// Wraps `channel`, already registered with `registry` under `token`.
    pub fn new(
        channel: C,
        token: Token,
        registry: Arc<Registry>,
        idle_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            channel: Mutex::new(channel),
            token,
            registry,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            idle_timeout,
            read_interest: Mutex::new(None),
            write_state: Mutex::new(WriteState::Idle),
            connection: Mutex::new(None),
            open: AtomicBool::new(true),
            self_weak: weak.clone(),
        })
    }

    /// A type-erased handle to this endpoint, for handing to a bound
    /// [`Connection`].
    pub fn handle(self: &Arc<Self>) -> Arc<dyn EndpointHandle> {
        self.clone() as Arc<dyn EndpointHandle>
    }

    /// Derives a type-erased handle from a plain reference, using the
    /// endpoint's own back-reference (spec.md §9's cyclic Endpoint↔Connection
    /// reference, resolved with `Arc::new_cyclic` rather than a stored
    /// `Connection`-side back-pointer).
    fn handle_from_ref(&self) -> Arc<dyn EndpointHandle> {
        self.self_weak
            .upgrade()
            .expect("endpoint outlives its own handles")
    }

    /// Binds `connection` and fires its `on_open`. Must be called exactly
    /// once, by whichever code accepted/connected this endpoint.
    pub fn bind(self: &Arc<Self>, mut connection: Box<dyn Connection>) {
        let handle = self.handle();
        connection.on_open(handle);
        *self.connection.lock().unwrap() = Some(connection);
    }

    /// Time since the endpoint was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Duration since the last read or write progress, for idle-timeout
    /// scanning by the owning selector.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// The configured idle timeout, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Called by the owning selector when `mio` reports the channel
    /// readable.
    pub fn on_readable(&self) {
        self.touch();
        let cb = self.read_interest.lock().unwrap().take();
        if let Some(cb) = cb {
            cb.succeeded();
        }
        self.rearm();
    }

    /// Called by the owning selector when `mio` reports the channel
    /// writable.
    pub fn on_writable(&self) {
        self.touch();
        self.pump_write();
    }

    /// Called by the owning selector when this endpoint has exceeded its
    /// idle timeout with no read or write progress. Fails any pending
    /// demand with [`CoreError::Timeout`] (transient); does not close the
    /// endpoint itself, leaving that decision to the bound connection.
    pub fn on_idle_timeout(&self) {
        let cb = self.read_interest.lock().unwrap().take();
        if let Some(cb) = cb {
            cb.failed(CoreError::Timeout);
        }
        let pending = {
            let mut state = self.write_state.lock().unwrap();
            match std::mem::replace(&mut *state, WriteState::Idle) {
                WriteState::Pending(p) => Some(p),
                WriteState::Idle => None,
            }
        };
        if let Some(mut p) = pending {
            if let Some(cb) = p.callback.take() {
                cb.failed(CoreError::Timeout);
            }
        }
        self.rearm();
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn current_interest(&self) -> Option<Interest> {
        let reading = self.read_interest.lock().unwrap().is_some();
        let writing = matches!(&*self.write_state.lock().unwrap(), WriteState::Pending(_));
        match (reading, writing) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn rearm(&self) {
        if !self.is_open() {
            return;
        }
        if let Some(interest) = self.current_interest() {
            let mut channel = self.channel.lock().unwrap();
            let _ = self.registry.reregister(&mut *channel, self.token, interest);
        }
    }

    fn pump_write(&self) {
        loop {
            let next = {
                let mut state = self.write_state.lock().unwrap();
                let pending = match &mut *state {
                    WriteState::Pending(p) => p,
                    WriteState::Idle => return,
                };
                while matches!(pending.queue.front(), Some(b) if b.is_empty()) {
                    pending.queue.pop_front();
                }
                pending.queue.front().cloned()
            };

            let Some(chunk) = next else {
                self.finish_write(Ok(()));
                return;
            };

            let result = self.channel.lock().unwrap().write(&chunk);
            match result {
                Ok(0) => {
                    self.finish_write(Err(CoreError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ))));
                    return;
                }
                Ok(n) => {
                    self.touch();
                    let mut state = self.write_state.lock().unwrap();
                    if let WriteState::Pending(pending) = &mut *state {
                        if let Some(front) = pending.queue.front_mut() {
                            let _ = front.split_to(n);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.rearm();
                    return;
                }
                Err(e) => {
                    self.finish_write(Err(CoreError::Io(e)));
                    return;
                }
            }
        }
    }

    fn finish_write(&self, result: Result<(), CoreError>) {
        let callback = {
            let mut state = self.write_state.lock().unwrap();
            match std::mem::replace(&mut *state, WriteState::Idle) {
                WriteState::Pending(mut p) => p.callback.take(),
                WriteState::Idle => None,
            }
        };
        if let Some(cb) = callback {
            match result {
                Ok(()) => cb.succeeded(),
                Err(e) => cb.failed(e),
            }
        }
        self.rearm();
    }

    fn close_impl(&self, cause: Option<CoreError>) {
        if self.open.swap(false, Ordering::SeqCst) {
            let cb = self.read_interest.lock().unwrap().take();
            if let Some(cb) = cb {
                cb.failed(cause.clone().unwrap_or(CoreError::Closed));
            }
            let pending = {
                let mut state = self.write_state.lock().unwrap();
                match std::mem::replace(&mut *state, WriteState::Idle) {
                    WriteState::Pending(p) => Some(p),
                    WriteState::Idle => None,
                }
            };
            if let Some(mut p) = pending {
                if let Some(cb) = p.callback.take() {
                    cb.failed(cause.clone().unwrap_or(CoreError::Closed));
                }
            }
            let _ = self.channel.lock().unwrap().shutdown(Shutdown::Both);
            if let Some(mut connection) = self.connection.lock().unwrap().take() {
                connection.on_close(cause);
            }
        }
    }
}

impl<C: Channel + 'static> EndpointHandle for Endpoint<C> {
    fn fill_interested(&self, cb: BoxCallback) {
        if !self.is_open() {
            cb.failed(CoreError::Closed);
            return;
        }
        let mut interest = self.read_interest.lock().unwrap();
        if interest.is_some() {
            drop(interest);
            cb.failed(CoreError::Usage("read already pending"));
            return;
        }
        *interest = Some(cb);
        drop(interest);
        self.rearm();
    }

    fn fill(&self, buf: &mut [u8]) -> Result<isize, CoreError> {
        if !self.is_open() {
            return Err(CoreError::Closed);
        }
        match self.channel.lock().unwrap().read(buf) {
            Ok(0) => Ok(-1),
            Ok(n) => {
                self.touch();
                Ok(n as isize)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn write(&self, cb: BoxCallback, buffers: Vec<Bytes>) {
        if !self.is_open() {
            cb.failed(CoreError::Closed);
            return;
        }
        if buffers.iter().all(|b| b.is_empty()) {
            cb.succeeded();
            return;
        }
        {
            let mut state = self.write_state.lock().unwrap();
            if matches!(&*state, WriteState::Pending(_)) {
                drop(state);
                cb.failed(CoreError::Usage("write already pending"));
                return;
            }
            *state = WriteState::Pending(WritePending {
                queue: buffers.into_iter().collect(),
                callback: Some(cb),
            });
        }
        self.pump_write();
    }

    fn shutdown_output(&self) {
        let _ = self.channel.lock().unwrap().shutdown(Shutdown::Write);
    }

    fn close(&self) {
        self.close_impl(None);
    }

    fn close_with_cause(&self, cause: CoreError) {
        self.close_impl(Some(cause));
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn upgrade(&self, new_connection: Box<dyn Connection>, listeners: &ListenerRegistry) {
        *self.read_interest.lock().unwrap() = None;
        let old = self.connection.lock().unwrap().take();
        if let Some(mut old) = old {
            old.on_close(None);
            listeners.fire_closed(old.as_ref());
        }
        let mut new_connection = new_connection;
        new_connection.on_open(self.handle_from_ref());
        listeners.fire_opened(new_connection.as_ref());
        *self.connection.lock().unwrap() = Some(new_connection);
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.lock().unwrap().local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.channel.lock().unwrap().peer_addr()
    }
}

impl<C: Channel + 'static> crate::selector::ManagedEndpoint for Endpoint<C> {
    fn on_readable(&self) {
        Endpoint::on_readable(self);
    }

    fn on_writable(&self) {
        Endpoint::on_writable(self);
    }

    fn on_idle_timeout(&self) {
        Endpoint::on_idle_timeout(self);
    }

    fn idle_for(&self) -> Duration {
        Endpoint::idle_for(self)
    }

    fn idle_timeout(&self) -> Option<Duration> {
        Endpoint::idle_timeout(self)
    }

    fn is_open(&self) -> bool {
        EndpointHandle::is_open(self)
    }
}
