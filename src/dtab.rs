//! Delegation tables: ordered prefix rewrite rules (spec §3).

use std::cell::RefCell;
use std::fmt;

use super::name_tree::NameTree;
use super::path::Path;

/// A single rewrite rule: `prefix ⇒ tree`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dentry {
    pub prefix: Path,
    pub tree: NameTree<Path>,
}

impl Dentry {
    pub fn new(prefix: Path, tree: NameTree<Path>) -> Dentry {
        Dentry { prefix, tree }
    }
}

/// An ordered delegation table. Two DTabs compose by concatenation
/// (`DTab::concat`); composition is order-significant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct DTab(Vec<Dentry>);

impl DTab {
    pub fn empty() -> DTab {
        DTab(Vec::new())
    }

    pub fn new(entries: Vec<Dentry>) -> DTab {
        DTab(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[Dentry] {
        &self.0
    }

    /// `base ++ local`: `self`'s entries followed by `other`'s, preserving order.
    pub fn concat(&self, other: &DTab) -> DTab {
        let mut entries = Vec::with_capacity(self.0.len() + other.0.len());
        entries.extend(self.0.iter().cloned());
        entries.extend(other.0.iter().cloned());
        DTab(entries)
    }
}

impl fmt::Display for DTab {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}=>{:?}", d.prefix, d.tree)?;
        }
        Ok(())
    }
}

thread_local! {
    /// The process's ambient *base* DTab, set once at startup. `Rc`-backed state
    /// isn't `Send`, and this crate's concurrency model (spec §5, DESIGN.md) is a
    /// single reactor thread per process, mirroring the teacher's own
    /// `tokio_core::reactor::Core`-per-thread deployment shape in `src/app.rs` — so a
    /// thread-local is the idiomatic equivalent of Finagle's ambient, JVM-global base
    /// DTab here.
    static BASE_DTAB: RefCell<DTab> = RefCell::new(DTab::empty());
}

/// Returns the current base DTab for this thread.
pub fn base() -> DTab {
    BASE_DTAB.with(|d| d.borrow().clone())
}

/// Replaces the base DTab for this thread. Intended to be called once at startup.
pub fn set_base(dtab: DTab) {
    BASE_DTAB.with(|d| *d.borrow_mut() = dtab);
}
