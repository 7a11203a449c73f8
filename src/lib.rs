//! Dynamic name-binding and service-factory caching core for an RPC client: a
//! reactive path resolver (`Namer`/`DTab`/`NameTree`) sitting in front of a pair of
//! reference-counted caches (`DynNameFactory`, `ServiceFactoryCache`) that share
//! bindings and endpoint services across every caller asking for the same name.

#[macro_use]
extern crate futures;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;
extern crate tokio_core;
extern crate tokio_service;

pub mod activity;
pub mod binding_factory;
pub mod cache;
pub mod config;
pub mod dtab;
pub mod dyn_name_factory;
pub mod errors;
pub mod name;
pub mod name_tree;
pub mod namer;
pub mod path;
pub mod service;
pub mod tracer;

pub use activity::{Activity, ActivityState, Var};
pub use binding_factory::{BindingFactory, BoundService};
pub use cache::{RefCountedService, ServiceFactoryCache};
pub use config::WilyConfig;
pub use dtab::{DTab, Dentry};
pub use dyn_name_factory::{DynNameFactory, PendingOutcome, TracingService};
pub use errors::Error;
pub use name::{Addr, NameBound, NameId, WeightedAddr};
pub use name_tree::NameTree;
pub use namer::{DtabNamer, GlobalNamer, Namer, OrElse};
pub use path::Path;
pub use service::{ClientConnection, CloseFuture, FactoryFuture, ReleasableService, ServiceFactory};
pub use tracer::{NameTracer, TraceSink, TraceValue};
