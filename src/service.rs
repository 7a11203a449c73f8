//! The `ServiceFactory` contract: a capability that produces request-processing
//! handles on demand and can be retired. A produced service is a plain
//! `tokio_service::Service`; `ServiceFactory` is the layer above it that knows how
//! to build one, and when it's no longer fit to.

use futures::Future;
use tokio_service::Service;

use super::errors::Error;

pub type FactoryFuture<S> = Box<Future<Item = S, Error = Error>>;
pub type CloseFuture = Box<Future<Item = (), Error = Error>>;

/// A client connection handle, opaque to this crate: concrete transports are an
/// external collaborator. `ClientConnection` stands in for whatever connection
/// context a real transport would thread through `apply`.
pub trait ClientConnection: Clone + 'static {}
impl<T: Clone + 'static> ClientConnection for T {}

/// Capability to produce request-processing handles on demand, and to be retired.
///
/// `S` is the concrete `tokio_service::Service` implementation this factory
/// produces; `Conn` is the caller-supplied connection context passed to `apply`.
pub trait ServiceFactory<Conn, S>
where
    S: Service<Error = Error>,
{
    fn apply(&self, conn: Conn) -> FactoryFuture<S>;

    /// Retires the factory. After this resolves, no further `apply` should return a
    /// live service (spec §3's invariant).
    fn close(&self, deadline_ms: u64) -> CloseFuture;

    /// True if the factory currently believes it can service a request.
    fn is_available(&self) -> bool;
}

/// A boxed, type-erased `ServiceFactory`, the shape every cache entry and
/// `BindingFactory` field actually holds (erasure lets `ServiceFactoryCache<K>`
/// stay generic over `K` alone, not also over every concrete factory type).
pub type BoxedServiceFactory<Conn, S> = Box<ServiceFactory<Conn, S>>;

/// A produced `Service` that can release whatever pin on shared state its cache
/// layer holds, orthogonal to `tokio_service::Service::call`. Layered wrappers
/// (`RefCountedService`, `DynNameFactory`'s per-request tracer wrapper) forward this
/// by composition so that the outermost caller's `close()` reaches every layer
/// beneath it (spec §4.2/§9: "wrapping must be transparent to `Service.close`").
pub trait ReleasableService: Service<Error = Error> {
    fn close(&self);
}
