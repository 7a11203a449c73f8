//! Crate-wide error taxonomy.
//!
//! Mirrors the teacher's `connector::ConfigError` / `resolver::Error` style: plain
//! enums with hand-written `Display`/`Error` impls, no external error-handling crate.

use std::fmt;
use std::error::Error as StdError;

use super::dtab::DTab;

/// Errors surfaced by the naming/binding core.
#[derive(Debug, Clone)]
pub enum Error {
    /// A name resolved to no endpoints (`None` or `Some(empty)` in `NameTree::eval`).
    ///
    /// `local_dtab` is attached at the `BindingFactory` boundary when the ambient
    /// local DTab is non-empty (spec §4.4, §7.2).
    NoBrokersAvailable {
        name: String,
        local_dtab: Option<DTab>,
    },

    /// Raised for any `apply` that arrives after `close`, and for requests still
    /// queued at the moment of `close`.
    ServiceClosed,

    /// A queued request was interrupted by its caller.
    CancelledConnection { cause: Box<Error> },

    /// Internal marker distinguishing "the namer failed while I was queued" from a
    /// direct downstream error, used only by `DynNameFactory`/`NameTracer` to label
    /// the failure correctly. Never escapes `DynNameFactory::apply`; see spec §7.1.
    Naming(Box<Error>),

    /// An error surfaced unchanged from the downstream endpoint `ServiceFactory`.
    Downstream(Box<Error>),

    /// A cache builder failed to construct a factory for a key.
    CacheBuild(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NoBrokersAvailable { ref name, ref local_dtab } => {
                match *local_dtab {
                    Some(ref dtab) => {
                        write!(f, "No brokers available for name: {} (local dtab: {})", name, dtab)
                    }
                    None => write!(f, "No brokers available for name: {}", name),
                }
            }
            Error::ServiceClosed => write!(f, "service closed"),
            Error::CancelledConnection { ref cause } => {
                write!(f, "connection cancelled: {}", cause)
            }
            Error::Naming(ref e) => write!(f, "naming error: {}", e),
            Error::Downstream(ref e) => write!(f, "{}", e),
            Error::CacheBuild(ref msg) => write!(f, "failed to build cache entry: {}", msg),
        }
    }
}

impl StdError for Error {
    fn description(&self) -> &str {
        match *self {
            Error::NoBrokersAvailable { .. } => "no brokers available",
            Error::ServiceClosed => "service closed",
            Error::CancelledConnection { .. } => "connection cancelled",
            Error::Naming(_) => "naming error",
            Error::Downstream(_) => "downstream error",
            Error::CacheBuild(_) => "cache build error",
        }
    }

    fn cause(&self) -> Option<&StdError> {
        match *self {
            Error::CancelledConnection { ref cause } => Some(&**cause as &StdError),
            Error::Naming(ref e) => Some(&**e as &StdError),
            Error::Downstream(ref e) => Some(&**e as &StdError),
            _ => None,
        }
    }
}

impl Error {
    /// Unwraps the internal `Naming` marker, if present, returning the underlying
    /// error as callers should see it (spec §4.2/§7.1: the marker is never surfaced).
    pub fn unwrap_naming(self) -> Error {
        match self {
            Error::Naming(inner) => *inner,
            other => other,
        }
    }

    /// A short, stable label for tracer annotations (spec §4.3's `wily.failure`).
    pub fn kind_name(&self) -> &'static str {
        match *self {
            Error::NoBrokersAvailable { .. } => "NoBrokersAvailable",
            Error::ServiceClosed => "ServiceClosed",
            Error::CancelledConnection { .. } => "CancelledConnection",
            Error::Naming(_) => "NamingException",
            Error::Downstream(_) => "Downstream",
            Error::CacheBuild(_) => "CacheBuild",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_naming_strips_marker() {
        let inner = Error::ServiceClosed;
        let wrapped = Error::Naming(Box::new(inner));
        match wrapped.unwrap_naming() {
            Error::ServiceClosed => {}
            other => panic!("expected ServiceClosed, got {:?}", other),
        }
    }

    #[test]
    fn kind_name_is_stable() {
        assert_eq!(Error::ServiceClosed.kind_name(), "ServiceClosed");
    }
}
