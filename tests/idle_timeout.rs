//! A connection that never receives data should see its pending read
//! interest fail with a transient timeout, without the endpoint itself
//! being closed (spec.md §4.3's "idle timeout is a notification, not a
//! forced close").

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactorio::{
    ConnectContext, Connection, ConnectionFactory, CoreError, EndpointHandle, FnCallback, Options,
    SelectorManager,
};

struct IdleConnection {
    timed_out: Arc<AtomicBool>,
    endpoint: Arc<Mutex<Option<Arc<dyn EndpointHandle>>>>,
}

impl Connection for IdleConnection {
    fn on_open(&mut self, endpoint: Arc<dyn EndpointHandle>) {
        *self.endpoint.lock().unwrap() = Some(endpoint.clone());
        let timed_out = self.timed_out.clone();
        endpoint.fill_interested(Box::new(FnCallback::new(
            || panic!("no data was ever sent; fill_interested should not succeed"),
            move |cause| {
                assert!(matches!(cause, CoreError::Timeout));
                timed_out.store(true, Ordering::SeqCst);
            },
        )));
    }

    fn on_fillable(&mut self) {}
    fn on_close(&mut self, _cause: Option<CoreError>) {}
}

struct IdleFactory {
    timed_out: Arc<AtomicBool>,
    endpoint: Arc<Mutex<Option<Arc<dyn EndpointHandle>>>>,
}

impl ConnectionFactory for IdleFactory {
    fn new_connection(
        &self,
        _endpoint: Arc<dyn EndpointHandle>,
        _context: &ConnectContext,
    ) -> Box<dyn Connection> {
        Box::new(IdleConnection {
            timed_out: self.timed_out.clone(),
            endpoint: self.endpoint.clone(),
        })
    }
}

#[test]
fn idle_connections_fail_pending_reads_with_a_transient_timeout() {
    let mut options = Options::default();
    options.selectors = 1;
    options.idle_timeout = Some(Duration::from_millis(50));
    options.idle_scan_interval = Duration::from_millis(10);
    let manager = SelectorManager::start(options).unwrap();

    let timed_out = Arc::new(AtomicBool::new(false));
    let endpoint_slot: Arc<Mutex<Option<Arc<dyn EndpointHandle>>>> = Arc::new(Mutex::new(None));
    let factory = Arc::new(IdleFactory {
        timed_out: timed_out.clone(),
        endpoint: endpoint_slot.clone(),
    });

    let addr = manager
        .serve_tcp("127.0.0.1:0".parse().unwrap(), factory)
        .unwrap();

    // Held open but never written to, so the endpoint goes idle.
    let _client = TcpStream::connect(addr).unwrap();

    for _ in 0..200 {
        if timed_out.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(timed_out.load(Ordering::SeqCst), "expected an idle timeout");

    let endpoint = endpoint_slot.lock().unwrap().clone().unwrap();
    assert!(
        endpoint.is_open(),
        "an idle timeout must not close the endpoint by itself"
    );

    manager.shutdown();
}
