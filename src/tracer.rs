//! `NameTracer`: records path/dtab/outcome annotations against the current trace
//! context (spec §4.3). Pure side effect; the actual tracing backend is injected by
//! the caller, matching spec §9's "pass the tracer as an explicit parameter, not via
//! global state."

use std::rc::Rc;

use super::dtab::DTab;
use super::errors::Error;
use super::name::NameBound;
use super::path::Path;

/// A value recorded against a trace key. Kept to the two shapes this crate ever
/// needs to emit, rather than reaching for a `Box<dyn Any>` the teacher's stack has
/// no precedent for (SPEC_FULL §4.3).
#[derive(Clone, Debug, PartialEq)]
pub enum TraceValue {
    Str(String),
    Id(u64),
}

/// The injected tracing sink: `(key, value) -> ()`.
pub type TraceSink = Rc<Fn(&str, TraceValue)>;

/// Records the four annotations spec §4.3 names, against one `(path, base, local)`
/// triple, for every `Try<NameBound>` outcome it is handed.
#[derive(Clone)]
pub struct NameTracer {
    path: Path,
    base: DTab,
    local: DTab,
    sink: TraceSink,
}

impl NameTracer {
    pub fn new(path: Path, base: DTab, local: DTab, sink: TraceSink) -> NameTracer {
        NameTracer { path, base, local, sink }
    }

    fn record_context(&self) {
        (self.sink)("wily.path", TraceValue::Str(self.path.to_string()));
        (self.sink)("wily.dtab.base", TraceValue::Str(self.base.to_string()));
        (self.sink)("wily.dtab.local", TraceValue::Str(self.local.to_string()));
    }

    /// Records a successful binding: the three context annotations plus
    /// `wily.name`.
    pub fn record_ok(&self, bound: &NameBound) {
        self.record_context();
        (self.sink)("wily.name", TraceValue::Id(bound.id().into()));
    }

    /// Records a naming failure: the three context annotations plus
    /// `wily.failure`.
    pub fn record_failure(&self, err: &Error) {
        self.record_context();
        (self.sink)("wily.failure", TraceValue::Str(err.kind_name().to_string()));
    }
}
