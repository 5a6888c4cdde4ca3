//! A connection that upgrades itself mid-stream (spec.md §4.4 "Upgrade"):
//! the first byte seen swaps the protocol handler in place on the same
//! endpoint, and the replacement connection takes over I/O from there.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reactorio::{
    ConnectContext, Connection, ConnectionFactory, ConnectionListener, CoreError, EndpointHandle,
    FnCallback, ListenerRegistry, Options, SelectorManager,
};

struct CountingListener {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ConnectionListener for CountingListener {
    fn on_opened(&self, connection: &dyn Connection) {
        let _ = connection.protocol();
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
    fn on_closed(&self, _connection: &dyn Connection) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speaks until it sees any byte, then swaps itself out for an echo
/// connection and announces the switch.
struct PreambleConnection {
    listeners: Arc<ListenerRegistry>,
}

impl Connection for PreambleConnection {
    fn on_open(&mut self, endpoint: Arc<dyn EndpointHandle>) {
        let listeners = self.listeners.clone();
        let for_read = endpoint.clone();
        endpoint.fill_interested(Box::new(FnCallback::new(
            move || {
                // Don't consume the byte: the echo connection taking over
                // reads it after the swap.
                for_read.upgrade(Box::new(EchoConnection::new()), &listeners);
            },
            |_: CoreError| {},
        )));
    }

    fn on_fillable(&mut self) {}
    fn on_close(&mut self, _cause: Option<CoreError>) {}
    fn protocol(&self) -> &'static str {
        "preamble"
    }
}

struct EchoConnection {
    endpoint: Mutex<Option<Arc<dyn EndpointHandle>>>,
}

impl EchoConnection {
    fn new() -> Self {
        Self {
            endpoint: Mutex::new(None),
        }
    }

    fn arm(endpoint: Arc<dyn EndpointHandle>) {
        let for_read = endpoint.clone();
        endpoint.fill_interested(Box::new(FnCallback::new(
            move || Self::pump(for_read),
            |_: CoreError| {},
        )));
    }

    fn pump(endpoint: Arc<dyn EndpointHandle>) {
        let mut buf = [0u8; 4096];
        match endpoint.fill(&mut buf) {
            Ok(n) if n > 0 => {
                let data = Bytes::copy_from_slice(&buf[..n as usize]);
                let for_rearm = endpoint.clone();
                endpoint.write(
                    Box::new(FnCallback::new(
                        move || Self::arm(for_rearm),
                        |_: CoreError| {},
                    )),
                    vec![data],
                );
            }
            Ok(n) if n < 0 => endpoint.close(),
            _ => Self::arm(endpoint),
        }
    }
}

impl Connection for EchoConnection {
    fn on_open(&mut self, endpoint: Arc<dyn EndpointHandle>) {
        *self.endpoint.lock().unwrap() = Some(endpoint.clone());
        let announce: Bytes = Bytes::from_static(b"UPGRADED\n");
        let for_arm = endpoint.clone();
        endpoint.write(
            Box::new(FnCallback::new(
                move || Self::arm(for_arm),
                |_: CoreError| {},
            )),
            vec![announce],
        );
    }

    fn on_fillable(&mut self) {}
    fn on_close(&mut self, _cause: Option<CoreError>) {}
    fn protocol(&self) -> &'static str {
        "echo"
    }
}

struct PreambleFactory {
    listeners: Arc<ListenerRegistry>,
}

impl ConnectionFactory for PreambleFactory {
    fn new_connection(
        &self,
        _endpoint: Arc<dyn EndpointHandle>,
        _context: &ConnectContext,
    ) -> Box<dyn Connection> {
        Box::new(PreambleConnection {
            listeners: self.listeners.clone(),
        })
    }
}

#[test]
fn upgrading_a_connection_swaps_the_protocol_handler_in_place() {
    let mut options = Options::default();
    options.selectors = 1;
    let manager = SelectorManager::start(options).unwrap();

    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    manager.listeners().subscribe(Box::new(CountingListener {
        opened: opened.clone(),
        closed: closed.clone(),
    }));

    let factory = Arc::new(PreambleFactory {
        listeners: manager.listeners().clone(),
    });
    let addr = manager
        .serve_tcp("127.0.0.1:0".parse().unwrap(), factory)
        .unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    client.write_all(b"x").unwrap();

    let mut banner = [0u8; 9];
    client.read_exact(&mut banner).unwrap();
    assert_eq!(&banner, b"UPGRADED\n");

    client.write_all(b"still here").unwrap();
    let mut echoed = [0u8; 10];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"still here");

    for _ in 0..200 {
        if opened.load(Ordering::SeqCst) >= 2 && closed.load(Ordering::SeqCst) >= 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(opened.load(Ordering::SeqCst) >= 2, "preamble and echo should both fire on_opened");
    assert!(closed.load(Ordering::SeqCst) >= 1, "the preamble connection should fire on_closed when upgraded away");

    manager.shutdown();
}
