//! `BindingFactory`: the top-level entry point binding one logical path against a
//! caller-supplied local `DTab`, sharing both the per-DTab-pair binding and the
//! per-bound-name endpoint factory across callers (spec §4.4).

use std::collections::BTreeSet;
use std::rc::Rc;

use futures::Future;
use tacho;
use tokio_core::reactor::Handle;
use tokio_service::Service;

use super::activity::{Activity, ActivityState};
use super::cache::{RefCountedService, ServiceFactoryCache};
use super::dtab::{self, DTab};
use super::dyn_name_factory::{DynNameFactory, TracingService};
use super::errors::Error;
use super::name::NameBound;
use super::name_tree::NameTree;
use super::namer::{DtabNamer, GlobalNamer, Namer, OrElse};
use super::path::Path;
use super::service::{CloseFuture, FactoryFuture, ReleasableService, ServiceFactory};
use super::tracer::{NameTracer, TraceSink};

/// The concrete service type a `BindingFactory` hands back: a cached, tracer-bound,
/// ref-counted endpoint service, wrapped so downstream `NoBrokersAvailable` errors
/// pick up the caller's local DTab for context (spec §4.4's "must preserve all
/// other behaviours" and §7.2's error-enrichment law).
pub type BoundService<RawS> = DtabEnrichingService<RefCountedService<TracingService<RefCountedService<RawS>>>>;

/// Attaches `local` to an unenriched `NoBrokersAvailable`, leaving every other
/// error (and an already-enriched one) untouched. Used both for the acquisition
/// future itself and for errors surfacing from a produced service's calls.
fn enrich_no_brokers(err: Error, local: &DTab) -> Error {
    if local.is_empty() {
        return err;
    }
    match err {
        Error::NoBrokersAvailable { name, local_dtab: None } => {
            Error::NoBrokersAvailable { name, local_dtab: Some(local.clone()) }
        }
        other => other,
    }
}

/// Wraps a produced `Service`, rescuing `NoBrokersAvailable` from every downstream
/// call and re-raising it with the local DTab attached. Transparent to everything
/// else, including `close` (spec §4.4/§9).
pub struct DtabEnrichingService<S> {
    inner: S,
    local: DTab,
}

impl<S> DtabEnrichingService<S> {
    fn new(inner: S, local: DTab) -> DtabEnrichingService<S> {
        DtabEnrichingService { inner, local }
    }
}

impl<Req, S: Service<Request = Req, Error = Error>> Service for DtabEnrichingService<S> {
    type Request = Req;
    type Response = S::Response;
    type Error = Error;
    type Future = Box<Future<Item = S::Response, Error = Error>>;

    fn call(&self, req: Req) -> Self::Future {
        let local = self.local.clone();
        Box::new(self.inner.call(req).or_else(move |e| Err(enrich_no_brokers(e, &local))))
    }
}

impl<S: ReleasableService> ReleasableService for DtabEnrichingService<S> {
    fn close(&self) {
        self.inner.close();
    }
}

/// Resolves `namer.bind(Leaf(path))` down to a single `Activity<NameBound>`,
/// applying spec §4.4 step 2's reduction: a negative or empty evaluation becomes
/// `NoBrokersAvailable`; a singleton binds directly; more than one alternative is
/// combined via `NameBound::all`.
fn bind_single<N: Namer>(namer: &N, path: &Path) -> Activity<NameBound> {
    let source = namer.bind(NameTree::Leaf(path.clone()));
    let out = Activity::pending();
    let out2 = out.clone();
    let path = path.clone();

    let sub = source.respond(move |state| match *state {
        ActivityState::Pending => out2.var().set(ActivityState::Pending),
        ActivityState::Failed(ref e) => out2.var().set(ActivityState::Failed(e.clone())),
        ActivityState::Ok(ref tree) => match tree.eval() {
            None => out2.set_failed(Error::NoBrokersAvailable { name: path.to_string(), local_dtab: None }),
            Some(ref set) if set.is_empty() => {
                out2.set_failed(Error::NoBrokersAvailable { name: path.to_string(), local_dtab: None })
            }
            Some(set) => out2.set_ok(combine(set)),
        },
    });

    // Keep the upstream subscription (and the activity it observes) alive for as
    // long as `out` is, mirroring the keep-alive idiom in `namer::or_else_activity`.
    out.retain(sub);
    out
}

fn combine(set: BTreeSet<NameBound>) -> NameBound {
    let members: Vec<NameBound> = set.into_iter().collect();
    NameBound::all(members)
}

/// Per-path entry point: composes a caller's local `DTab` against the ambient base,
/// resolves it through an injected terminal `Namer`, and shares both the resulting
/// binding and its downstream endpoint services across every caller presenting the
/// same `(base, local)` pair or the same resolved name (spec §4.4).
pub struct BindingFactory<Conn, RawS> {
    path: Path,
    base_namer: Rc<Namer>,
    new_endpoint: Rc<Fn(NameBound) -> Rc<ServiceFactory<Conn, RawS>>>,
    name_cache: ServiceFactoryCache<NameBound, Conn, RawS>,
    dtab_cache: ServiceFactoryCache<(DTab, DTab), Conn, TracingService<RefCountedService<RawS>>>,
    trace_sink: TraceSink,
    handle: Handle,
}

impl<Conn, RawS> Clone for BindingFactory<Conn, RawS> {
    fn clone(&self) -> Self {
        BindingFactory {
            path: self.path.clone(),
            base_namer: self.base_namer.clone(),
            new_endpoint: self.new_endpoint.clone(),
            name_cache: self.name_cache.clone(),
            dtab_cache: self.dtab_cache.clone(),
            trace_sink: self.trace_sink.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<Conn, RawS> BindingFactory<Conn, RawS>
where
    Conn: 'static,
    RawS: Service<Error = Error> + 'static,
{
    /// `path` is the logical name this factory binds. `base_namer` is the injected
    /// terminal resolver (spec §1's external-collaborator `Namer`) consulted once a
    /// DTab's own rewrite rules are exhausted. `new_endpoint` builds the raw
    /// endpoint `ServiceFactory` for a freshly bound name's reactive address.
    pub fn new(
        path: Path,
        base_namer: Rc<Namer>,
        new_endpoint: Rc<Fn(NameBound) -> Rc<ServiceFactory<Conn, RawS>>>,
        name_cache_capacity: usize,
        dtab_cache_capacity: usize,
        trace_sink: TraceSink,
        handle: Handle,
        scope: &tacho::Scope,
    ) -> BindingFactory<Conn, RawS> {
        BindingFactory {
            path,
            base_namer,
            new_endpoint,
            name_cache: ServiceFactoryCache::new(name_cache_capacity, &scope.clone().prefixed("name")),
            dtab_cache: ServiceFactoryCache::new(dtab_cache_capacity, &scope.clone().prefixed("dtab")),
            trace_sink,
            handle,
        }
    }

    /// Resolves `path` against `base ++ local`, through `DynNameFactory`, caching the
    /// binding by `(base, local)` and its endpoint by resolved name, then hands back
    /// a service wrapped so any subsequent `NoBrokersAvailable` picks up `local` for
    /// context (spec §4.4).
    pub fn apply(&self, conn: Conn, local: DTab) -> FactoryFuture<BoundService<RawS>> {
        let base = dtab::base();
        let key = (base.clone(), local.clone());
        let this = self.clone();
        let local_for_err = local.clone();
        let local_for_wrap = local.clone();

        let fut = self
            .dtab_cache
            .apply(key, conn, move |k| this.build_dyn_name_factory(k));

        Box::new(fut.then(move |res| match res {
            Ok(service) => Ok(DtabEnrichingService::new(service, local_for_wrap)),
            Err(e) => Err(enrich_no_brokers(e, &local_for_err)),
        }))
    }

    fn build_dyn_name_factory(
        &self,
        key: &(DTab, DTab),
    ) -> Rc<ServiceFactory<Conn, TracingService<RefCountedService<RawS>>>> {
        let (ref base, ref local) = *key;
        let composed_dtab = base.concat(local);
        let namer = OrElse::new(DtabNamer::new(composed_dtab, self.base_namer.clone()), GlobalNamer::default());
        let activity = bind_single(&namer, &self.path);
        let tracer = NameTracer::new(self.path.clone(), base.clone(), local.clone(), self.trace_sink.clone());

        let name_cache = self.name_cache.clone();
        let new_endpoint = self.new_endpoint.clone();
        let new_service: Rc<Fn(NameBound, Conn) -> FactoryFuture<RefCountedService<RawS>>> = Rc::new(move |bound, conn| {
            let new_endpoint = new_endpoint.clone();
            name_cache.apply(bound, conn, move |b| (new_endpoint)(b.clone()))
        });

        Rc::new(DynNameFactory::new(activity, new_service, tracer, self.handle.clone()))
    }

    /// True if the DTab cache believes it can currently service a request for any
    /// binding it holds (spec §4.4, §9's resolved Open Question — an empty cache
    /// reads as available, matching `ServiceFactoryCache::is_available`).
    pub fn is_available(&self) -> bool {
        self.dtab_cache.is_available()
    }

    /// Closes both cache layers. The DTab cache is closed first so no new
    /// `DynNameFactory` can hand out a fresh endpoint pin while endpoints are being
    /// retired underneath it.
    pub fn close(&self, deadline_ms: u64) -> CloseFuture {
        let name_cache = self.name_cache.clone();
        Box::new(
            self.dtab_cache
                .close(deadline_ms)
                .then(move |_| name_cache.close(deadline_ms)),
        )
    }
}
