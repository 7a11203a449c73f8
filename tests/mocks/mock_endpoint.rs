//! A trivial endpoint `Service`/`ServiceFactory` pair standing in for a real
//! transport-level connection pool (out of scope per the core's own spec; mirrors
//! the teacher's `tests/mocks/mock_webserver.rs`, a stand-in downstream peer rather
//! than the thing under test).

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::Future;
use tokio_service::Service;
use wily_core::{CloseFuture, Error, FactoryFuture, ReleasableService, ServiceFactory};

/// Echoes back the `SocketAddr` it was constructed with, so a test can assert which
/// endpoint a resolved name ultimately dispatched to.
pub struct EchoService(pub SocketAddr);

impl Service for EchoService {
    type Request = ();
    type Response = SocketAddr;
    type Error = Error;
    type Future = Box<Future<Item = SocketAddr, Error = Error>>;

    fn call(&self, _req: ()) -> Self::Future {
        Box::new(futures::future::ok(self.0))
    }
}

impl ReleasableService for EchoService {
    fn close(&self) {}
}

/// Builds `EchoService`s, counting how many times it was asked to (so tests can
/// assert a downstream pool was constructed at most once per bound name, per
/// spec's cache-sharing law).
pub struct EchoFactory {
    addr: SocketAddr,
    pub builds: Rc<Cell<usize>>,
}

impl EchoFactory {
    pub fn new(addr: SocketAddr) -> Rc<EchoFactory> {
        Rc::new(EchoFactory { addr, builds: Rc::new(Cell::new(0)) })
    }
}

impl ServiceFactory<(), EchoService> for EchoFactory {
    fn apply(&self, _conn: ()) -> FactoryFuture<EchoService> {
        self.builds.set(self.builds.get() + 1);
        Box::new(futures::future::ok(EchoService(self.addr)))
    }

    fn close(&self, _deadline_ms: u64) -> CloseFuture {
        Box::new(futures::future::ok(()))
    }

    fn is_available(&self) -> bool {
        true
    }
}
