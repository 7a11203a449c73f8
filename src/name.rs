//! Resolved, terminal names (spec §3's `Name.Bound`).

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::rc::Rc;

use super::activity::{Subscription, Var};
use super::errors::Error;

/// A concrete, weighted destination endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedAddr {
    pub addr: SocketAddr,
    pub weight: f64,
}

impl WeightedAddr {
    pub fn new(addr: SocketAddr, weight: f64) -> WeightedAddr {
        WeightedAddr { addr, weight }
    }
}

/// The reactive state of a bound name's concrete address set.
#[derive(Clone, Debug)]
pub enum Addr {
    Pending,
    Bound(Vec<WeightedAddr>),
    Neg,
    Failed(Rc<Error>),
}

/// Opaque identity for a `NameBound`, used for cache keying and equality. Allocated
/// from a process-local counter the first time a given resolution produces a fresh
/// bound name; callers never construct one directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameId(u64);

impl From<NameId> for u64 {
    fn from(id: NameId) -> u64 {
        id.0
    }
}

thread_local! {
    static NEXT_ID: Cell<u64> = Cell::new(1);
}

fn next_id() -> NameId {
    NEXT_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        NameId(id)
    })
}

/// The terminal form of a name: an identity token for equality/cache-keying, and a
/// reactive `Var<Addr>` (spec §3).
#[derive(Clone)]
pub struct NameBound {
    id: NameId,
    addr: Var<Addr>,
    // Keeps any member subscriptions (see `all`) alive for as long as this bound
    // name is; empty for ordinary, non-union names.
    _subs: Rc<RefCell<Vec<Subscription<Addr>>>>,
}

impl NameBound {
    /// Creates a fresh bound name with its own identity, backed by `addr`.
    pub fn new(addr: Var<Addr>) -> NameBound {
        NameBound {
            id: next_id(),
            addr,
            _subs: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn id(&self) -> NameId {
        self.id
    }

    pub fn addr(&self) -> &Var<Addr> {
        &self.addr
    }

    /// Builds a union bound name aggregating the addresses of `members` (spec
    /// §4.4's `Name.all(set)`).
    ///
    /// Per spec §9's open question, aggregation is treated as an order-independent
    /// combiner: on every member update, the merged `Addr` is recomputed as the
    /// union of all members' currently known bound addresses (deduplicated by
    /// socket address; a `Bound` overrides `Pending`/`Neg`/`Failed` from other
    /// members, `Pending` overrides `Neg`/`Failed`, matching the `BTreeSet`-style
    /// merge spec §9 calls for rather than a positional concatenation).
    pub fn all(members: Vec<NameBound>) -> NameBound {
        if members.len() == 1 {
            return members.into_iter().next().unwrap();
        }

        let member_addrs: Rc<Vec<Var<Addr>>> =
            Rc::new(members.iter().map(|m| m.addr().clone()).collect());
        let merged = Var::new(recompute_union(&member_addrs));

        let subs: Vec<Subscription<Addr>> = member_addrs
            .iter()
            .map(|member_addr| {
                let merged = merged.clone();
                let member_addrs = member_addrs.clone();
                member_addr.subscribe(move |_| {
                    merged.set(recompute_union(&member_addrs));
                })
            })
            .collect();

        NameBound {
            id: next_id(),
            addr: merged,
            _subs: Rc::new(RefCell::new(subs)),
        }
    }
}

fn recompute_union(members: &[Var<Addr>]) -> Addr {
    // Keyed by `SocketAddr`'s `Ord` impl (ip then port) so the merge is a plain
    // set union, independent of member order, per spec §9.
    let mut bound: BTreeSet<SocketAddr> = BTreeSet::new();
    let mut weights: Vec<WeightedAddr> = Vec::new();
    let mut any_pending = false;
    let mut last_err: Option<Rc<Error>> = None;

    for m in members {
        match m.sample() {
            Addr::Pending => any_pending = true,
            Addr::Neg => {}
            Addr::Failed(e) => last_err = Some(e),
            Addr::Bound(addrs) => {
                for a in addrs {
                    if bound.insert(a.addr) {
                        weights.push(a);
                    }
                }
            }
        }
    }

    if !weights.is_empty() {
        Addr::Bound(weights)
    } else if any_pending {
        Addr::Pending
    } else if let Some(e) = last_err {
        Addr::Failed(e)
    } else {
        Addr::Neg
    }
}

impl PartialEq for NameBound {
    fn eq(&self, other: &NameBound) -> bool {
        self.id == other.id
    }
}
impl Eq for NameBound {}

impl PartialOrd for NameBound {
    fn partial_cmp(&self, other: &NameBound) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NameBound {
    fn cmp(&self, other: &NameBound) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for NameBound {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NameBound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NameBound({:?})", self.id)
    }
}
