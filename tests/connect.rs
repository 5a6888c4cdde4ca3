//! `SelectorManager::connect_tcp` (spec.md §4.2 "connect"): a non-blocking
//! outbound connection promoted to a real `Endpoint`/`Connection` once the
//! handshake completes, against a plain `std::net::TcpListener` peer.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reactorio::{
    ConnectContext, Connection, ConnectionFactory, CoreError, EndpointHandle, FnCallback, Options,
    SelectorManager,
};

struct ClientConnection {
    is_server_seen: Arc<Mutex<Option<bool>>>,
    opened: Arc<AtomicBool>,
}

impl Connection for ClientConnection {
    fn on_open(&mut self, endpoint: Arc<dyn EndpointHandle>) {
        *self.is_server_seen.lock().unwrap() = Some(false);
        self.opened.store(true, Ordering::SeqCst);
        let cb = Box::new(FnCallback::new(|| {}, |_: CoreError| {}));
        endpoint.write(cb, vec![Bytes::from_static(b"hi from client")]);
    }
    fn on_fillable(&mut self) {}
    fn on_close(&mut self, _cause: Option<CoreError>) {}
}

struct ClientFactory {
    is_server_seen: Arc<Mutex<Option<bool>>>,
    opened: Arc<AtomicBool>,
}

impl ConnectionFactory for ClientFactory {
    fn new_connection(
        &self,
        _endpoint: Arc<dyn EndpointHandle>,
        context: &ConnectContext,
    ) -> Box<dyn Connection> {
        assert!(!context.is_server);
        Box::new(ClientConnection {
            is_server_seen: self.is_server_seen.clone(),
            opened: self.opened.clone(),
        })
    }
}

#[test]
fn connect_tcp_promotes_to_a_bound_connection_on_handshake_completion() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_thread = std::thread::spawn(move || {
        let (mut stream, _peer) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 14];
        stream.read_exact(&mut buf).unwrap();
        buf
    });

    let mut options = Options::default();
    options.selectors = 1;
    let manager = SelectorManager::start(options).unwrap();

    let opened = Arc::new(AtomicBool::new(false));
    let is_server_seen = Arc::new(Mutex::new(None));
    let factory = Arc::new(ClientFactory {
        is_server_seen: is_server_seen.clone(),
        opened: opened.clone(),
    });

    manager.connect_tcp(addr, factory).unwrap();

    let received = accept_thread.join().unwrap();
    assert_eq!(&received, b"hi from client");

    for _ in 0..200 {
        if opened.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(opened.load(Ordering::SeqCst));
    assert_eq!(*is_server_seen.lock().unwrap(), Some(false));

    manager.shutdown();
}

#[test]
fn connect_tcp_to_a_closed_port_never_invokes_the_factory() {
    // Bind then immediately drop to get a port nothing is listening on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut options = Options::default();
    options.selectors = 1;
    options.connect_timeout = Duration::from_millis(300);
    let manager = SelectorManager::start(options).unwrap();

    let opened = Arc::new(AtomicBool::new(false));
    let is_server_seen = Arc::new(Mutex::new(None));
    let factory = Arc::new(ClientFactory {
        is_server_seen: is_server_seen.clone(),
        opened: opened.clone(),
    });

    manager.connect_tcp(addr, factory).unwrap();

    std::thread::sleep(Duration::from_millis(500));
    assert!(!opened.load(Ordering::SeqCst));

    manager.shutdown();
}
