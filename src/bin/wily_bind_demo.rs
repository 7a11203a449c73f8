//! Resolves a name against a small in-memory namer and issues a handful of
//! requests through the resulting `BindingFactory`, logging what each call saw.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate futures;
extern crate tacho;
extern crate tokio_core;
extern crate tokio_service;
extern crate wily_core;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

use clap::{App, Arg};
use futures::Future;
use tokio_core::reactor::Core;
use tokio_service::Service;

use wily_core::{
    Activity, Addr, BindingFactory, CloseFuture, DTab, Error, FactoryFuture, NameBound, NameTree,
    Namer, Path, ReleasableService, ServiceFactory, TraceValue, Var, WeightedAddr,
};

static TARGET_ARG: &'static str = "TARGET";
static ADDRS_ARG: &'static str = "addrs";
static REQUESTS_ARG: &'static str = "requests";
static LOCAL_DTAB_ARG: &'static str = "local-dtab";

fn main() {
    drop(pretty_env_logger::init());

    let opts = mk_app().get_matches();
    let target = opts.value_of(TARGET_ARG).unwrap();
    let requests: usize = opts.value_of(REQUESTS_ARG).unwrap().parse().unwrap();
    let addrs: Vec<SocketAddr> = opts
        .values_of(ADDRS_ARG)
        .map(|vs| vs.map(|v| v.parse().unwrap()).collect())
        .unwrap_or_else(Vec::new);
    let local_dtab = opts
        .value_of(LOCAL_DTAB_ARG)
        .map(parse_simple_dtab)
        .unwrap_or_else(DTab::empty);

    let mut core = Core::new().unwrap();
    let handle = core.handle();
    let metrics = tacho::Tacho::default().metrics;

    let mut registry = HashMap::new();
    registry.insert(Path::from(target), addrs.clone());
    let namer: Rc<Namer> = Rc::new(StaticNamer::new(registry));

    let new_endpoint: Rc<Fn(NameBound) -> Rc<ServiceFactory<(), EchoService>>> = Rc::new(|bound| {
        let addr = match bound.addr().sample() {
            Addr::Bound(ref addrs) if !addrs.is_empty() => addrs[0].addr,
            _ => "0.0.0.0:0".parse().unwrap(),
        };
        Rc::new(EchoFactory(addr))
    });

    let sink = Rc::new(|key: &str, value: TraceValue| {
        debug!("trace: {} = {:?}", key, value);
    });

    let binding = BindingFactory::new(
        Path::from(target),
        namer,
        new_endpoint,
        wily_core::config::DEFAULT_NAME_CACHE_CAPACITY,
        wily_core::config::DEFAULT_DTAB_CACHE_CAPACITY,
        sink,
        handle.clone(),
        &metrics,
    );

    if addrs.is_empty() {
        warn!("no addresses configured for {}; expect NoBrokersAvailable", target);
    }

    for i in 0..requests {
        let work = binding.apply((), local_dtab.clone()).and_then(|svc| svc.call(()));
        match core.run(work) {
            Ok(addr) => info!("request {}: resolved {} to {}", i, target, addr),
            Err(e) => error!("request {}: failed to resolve {}: {}", i, target, e),
        }
    }

    core.run(binding.close(1_000)).unwrap();
}

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::with_name(TARGET_ARG)
                .required(true)
                .index(1)
                .validator(is_path_like)
                .help("Logical name to resolve (e.g. /s/foo)"),
        )
        .arg(
            Arg::with_name(ADDRS_ARG)
                .short("a")
                .long(ADDRS_ARG)
                .takes_value(true)
                .multiple(true)
                .value_name("ADDR")
                .help("Address(es) the target resolves to; omit to simulate NoBrokersAvailable"),
        )
        .arg(
            Arg::with_name(REQUESTS_ARG)
                .short("r")
                .long(REQUESTS_ARG)
                .default_value("1")
                .takes_value(true)
                .validator(is_usize)
                .help("Number of requests to issue"),
        )
        .arg(
            Arg::with_name(LOCAL_DTAB_ARG)
                .short("d")
                .long(LOCAL_DTAB_ARG)
                .takes_value(true)
                .value_name("PREFIX")
                .help("A single local delegation prefix, negatively bound, to attach for error context"),
        )
}

fn is_path_like(v: String) -> Result<(), String> {
    if v.starts_with('/') {
        Ok(())
    } else {
        Err("the value did not start with a /".to_string())
    }
}

fn is_usize(v: String) -> Result<(), String> {
    v.parse::<usize>().map(|_| ()).map_err(|_| "the value must be a number".to_string())
}

/// A single-entry local DTab binding `prefix => Neg`, just enough to exercise the
/// error-enrichment path from the command line without pulling in a real parser.
fn parse_simple_dtab(prefix: &str) -> DTab {
    use wily_core::Dentry;
    DTab::new(vec![Dentry::new(Path::from(prefix), NameTree::Neg)])
}

/// A namer backed by a fixed table, standing in for a real delegation-aware
/// resolver (spec's external-collaborator `Namer`).
struct StaticNamer {
    table: HashMap<Path, Vec<SocketAddr>>,
}

impl StaticNamer {
    fn new(table: HashMap<Path, Vec<SocketAddr>>) -> StaticNamer {
        StaticNamer { table }
    }
}

impl Namer for StaticNamer {
    fn bind(&self, tree: NameTree<Path>) -> Activity<NameTree<NameBound>> {
        match tree {
            NameTree::Leaf(ref path) => match self.table.get(path) {
                Some(addrs) if !addrs.is_empty() => {
                    let weighted = addrs.iter().map(|a| WeightedAddr::new(*a, 1.0)).collect();
                    let bound = NameBound::new(Var::new(Addr::Bound(weighted)));
                    Activity::ok(NameTree::Leaf(bound))
                }
                _ => Activity::ok(NameTree::Neg),
            },
            _ => Activity::ok(NameTree::Neg),
        }
    }
}

/// Produces the resolved address back to the caller, standing in for a real
/// transport-level endpoint service (out of scope per spec §1).
struct EchoService(SocketAddr);

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

struct EchoFactory(SocketAddr);

impl ServiceFactory<(), EchoService> for EchoFactory {
    fn apply(&self, _conn: ()) -> FactoryFuture<EchoService> {
        Box::new(futures::future::ok(EchoService(self.0)))
    }

    fn close(&self, _deadline_ms: u64) -> CloseFuture {
        Box::new(futures::future::ok(()))
    }

    fn is_available(&self) -> bool {
        true
    }
}
