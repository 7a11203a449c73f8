//! End-to-end scenarios (S1-S6) for `BindingFactory` over a scripted `Namer` and a
//! mock endpoint factory, mirroring the teacher's own `tests/lib.rs` + `tests/mocks/`
//! layout: no real reactor I/O is involved, so `Future::wait()`/`Core::run` drives
//! each future to completion directly rather than exercising a real transport.

extern crate futures;
extern crate tacho;
extern crate tokio_core;
extern crate tokio_service;
extern crate wily_core;

mod mocks;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::Future;
use tokio_core::reactor::{Core, Handle};
use tokio_service::Service;

use mocks::mock_endpoint::{EchoFactory, EchoService};
use mocks::mock_namer::ScriptedNamer;

use wily_core::{
    Activity, Addr, BindingFactory, DTab, Dentry, Error, NameBound, NameTracer, NameTree, Namer,
    Path, ReleasableService, ServiceFactory, TraceValue, Var, WeightedAddr,
};

fn scope() -> tacho::Scope {
    tacho::Tacho::default().metrics
}

fn bound_to(addr: SocketAddr) -> (NameBound, Rc<EchoFactory>) {
    let factory = EchoFactory::new(addr);
    let bound = NameBound::new(Var::new(Addr::Bound(vec![WeightedAddr::new(addr, 1.0)])));
    (bound, factory)
}

fn factory_for(
    namer: Rc<Namer>,
    endpoint: Rc<EchoFactory>,
    handle: Handle,
) -> (BindingFactory<(), EchoService>, Rc<RefCell<Vec<(String, TraceValue)>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log2 = log.clone();
    let sink = Rc::new(move |k: &str, v: TraceValue| log2.borrow_mut().push((k.to_string(), v)));
    let new_endpoint: Rc<Fn(NameBound) -> Rc<ServiceFactory<(), EchoService>>> =
        Rc::new(move |_bound| endpoint.clone());
    let f = BindingFactory::new(Path::from("/s/foo"), namer, new_endpoint, 8, 4, sink, handle, &scope());
    (f, log)
}

/// S1 - Happy path, already bound: the namer resolves synchronously, and two
/// requests through the returned service each record the full tracer context plus
/// `wily.name`.
#[test]
fn s1_happy_path_already_bound() {
    let mut reactor = Core::new().unwrap();
    let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
    let (bound, endpoint) = bound_to(addr);
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(Activity::ok(NameTree::Leaf(bound))));
    let (f, log) = factory_for(namer, endpoint, reactor.handle());

    let svc = reactor.run(f.apply((), DTab::empty())).unwrap();
    reactor.run(svc.call(())).unwrap();
    reactor.run(svc.call(())).unwrap();

    let names: Vec<&str> = log.borrow().iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names.iter().filter(|k| **k == "wily.name").count(), 2);
    assert!(names.contains(&"wily.path"));
    assert!(names.contains(&"wily.dtab.base"));
    assert!(names.contains(&"wily.dtab.local"));
}

/// S2 - Pending then Ok: three applies queue up while the namer is pending, then
/// drain in enqueue order once it resolves.
#[test]
fn s2_pending_then_ok_drains_in_order() {
    let mut reactor = Core::new().unwrap();
    let addr: SocketAddr = "10.0.0.2:80".parse().unwrap();
    let (bound, endpoint) = bound_to(addr);

    let activity: Activity<NameTree<NameBound>> = Activity::pending();
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(activity.clone()));
    let (f, _log) = factory_for(namer, endpoint.clone(), reactor.handle());

    let f1 = f.apply((), DTab::empty());
    let f2 = f.apply((), DTab::empty());
    let f3 = f.apply((), DTab::empty());

    activity.set_ok(NameTree::Leaf(bound));

    let (s1, s2, s3) = reactor.run(f1.join3(f2, f3)).unwrap();
    assert_eq!(reactor.run(s1.call(())).unwrap(), addr);
    assert_eq!(reactor.run(s2.call(())).unwrap(), addr);
    assert_eq!(reactor.run(s3.call(())).unwrap(), addr);
}

/// S3 - Pending then Failed: queued applies all fail with the underlying error
/// (never the internal `Naming` wrapper), and each records a `wily.failure`.
#[test]
fn s3_pending_then_failed_fails_queue_with_underlying_error() {
    let mut reactor = Core::new().unwrap();
    let activity: Activity<NameTree<NameBound>> = Activity::pending();
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(activity.clone()));
    let endpoint = EchoFactory::new("10.0.0.9:80".parse().unwrap());
    let (f, log) = factory_for(namer, endpoint, reactor.handle());

    let pending = f.apply((), DTab::empty());
    activity.set_failed(Error::ServiceClosed);

    match reactor.run(pending) {
        Err(Error::ServiceClosed) => {}
        other => panic!("expected ServiceClosed, got {:?}", other.is_ok()),
    }
    let failures = log.borrow().iter().filter(|(k, _)| k == "wily.failure").count();
    assert_eq!(failures, 1);
}

/// S4 - Empty binding with a non-empty local DTab: the caller sees
/// `NoBrokersAvailable` enriched with the local DTab for context.
#[test]
fn s4_empty_binding_with_local_dtab_is_enriched() {
    let mut reactor = Core::new().unwrap();
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(Activity::ok(NameTree::Neg)));
    let endpoint = EchoFactory::new("10.0.0.3:80".parse().unwrap());
    let (f, _log) = factory_for(namer, endpoint, reactor.handle());

    let local = DTab::new(vec![Dentry::new(Path::from("/s"), NameTree::Leaf(Path::from("/alt")))]);

    match reactor.run(f.apply((), local.clone())) {
        Err(Error::NoBrokersAvailable { ref name, local_dtab: Some(ref d) }) => {
            assert_eq!(name, "/s/foo");
            assert_eq!(*d, local);
        }
        other => panic!("expected enriched NoBrokersAvailable, got {:?}", other.is_ok()),
    }
}

/// S5 - Cache sharing: two distinct DTab pairs resolving to the same bound name
/// share one downstream endpoint factory — the name cache's builder (`new_endpoint`)
/// is invoked exactly once even though two separate `DynNameFactory`/DTab-cache
/// entries both resolve to it.
#[test]
fn s5_distinct_dtab_pairs_share_one_endpoint_factory() {
    let mut reactor = Core::new().unwrap();
    let addr: SocketAddr = "10.0.0.4:80".parse().unwrap();
    let (bound, endpoint) = bound_to(addr);
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(Activity::ok(NameTree::Leaf(bound))));

    let build_calls = Rc::new(std::cell::Cell::new(0));
    let build_calls2 = build_calls.clone();
    let new_endpoint: Rc<Fn(NameBound) -> Rc<ServiceFactory<(), EchoService>>> = Rc::new(move |_bound| {
        build_calls2.set(build_calls2.get() + 1);
        endpoint.clone()
    });
    let sink = Rc::new(|_k: &str, _v: TraceValue| {});
    let f = BindingFactory::new(Path::from("/s/foo"), namer, new_endpoint, 8, 4, sink, reactor.handle(), &scope());

    let local_a = DTab::new(vec![Dentry::new(Path::from("/x"), NameTree::Neg)]);
    let local_b = DTab::new(vec![Dentry::new(Path::from("/y"), NameTree::Neg)]);

    let s1 = reactor.run(f.apply((), local_a)).unwrap();
    let s2 = reactor.run(f.apply((), local_b)).unwrap();

    assert_eq!(reactor.run(s1.call(())).unwrap(), addr);
    assert_eq!(reactor.run(s2.call(())).unwrap(), addr);
    assert_eq!(build_calls.get(), 1, "the endpoint factory builder runs once per bound name, not per DTab pair");
}

/// S6 - Cancellation while pending: a queued `DynNameFactory` apply interrupted by
/// its caller fails with `CancelledConnection`, and a later Ok transition does not
/// attempt to satisfy it.
#[test]
fn s6_cancel_while_pending() {
    use wily_core::DynNameFactory;

    let reactor = Core::new().unwrap();
    let activity: Activity<NameBound> = Activity::pending();
    let new_service: Rc<Fn(NameBound, ()) -> wily_core::FactoryFuture<EchoService>> =
        Rc::new(|_bound, _conn| Box::new(futures::future::ok(EchoService("10.0.0.5:80".parse().unwrap()))));
    let sink = Rc::new(|_k: &str, _v: TraceValue| {});
    let tracer = NameTracer::new(Path::from("/s/foo"), DTab::empty(), DTab::empty(), sink);
    let factory = DynNameFactory::new(activity.clone(), new_service, tracer, reactor.handle());

    let pending = factory.apply_cancelable(());
    pending.cancel(Error::ServiceClosed);

    match pending.wait() {
        Err(Error::CancelledConnection { .. }) => {}
        other => panic!("expected CancelledConnection, got {:?}", other.is_ok()),
    }

    // A subsequent Ok transition must not try to satisfy the already-cancelled entry.
    activity.set_ok(NameBound::new(Var::new(Addr::Pending)));
}

/// Closing a `BindingFactory` drains both cache layers; requests issued afterward
/// fail with `ServiceClosed`.
#[test]
fn close_drains_caches_and_refuses_further_applies() {
    let mut reactor = Core::new().unwrap();
    let addr: SocketAddr = "10.0.0.6:80".parse().unwrap();
    let (bound, endpoint) = bound_to(addr);
    let namer: Rc<Namer> = Rc::new(ScriptedNamer::new(Activity::ok(NameTree::Leaf(bound))));
    let (f, _log) = factory_for(namer, endpoint, reactor.handle());

    let svc = reactor.run(f.apply((), DTab::empty())).unwrap();
    svc.close();
    reactor.run(f.close(1_000)).unwrap();

    match reactor.run(f.apply((), DTab::empty())) {
        Err(Error::ServiceClosed) => {}
        other => panic!("expected ServiceClosed, got {:?}", other.is_ok()),
    }
}
