//! `ServiceFactoryCache<K>`: a bounded, reference-counted cache from a key to a
//! shared `ServiceFactory`, with idle (LRU) eviction (spec §4.1).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::rc::Rc;

use futures::{future, Future};
use tacho;
use tokio_service::Service;

use super::errors::Error;
use super::service::{CloseFuture, FactoryFuture, ReleasableService, ServiceFactory};

const DEFAULT_CLOSE_DEADLINE_MS: u64 = 5_000;

/// A `Service` produced through a `ServiceFactoryCache`, pinning its cache entry
/// for as long as it is outstanding. Forwards every `tokio_service::Service` call
/// to the wrapped service by composition (never by inheritance, per spec §9, so
/// `close` stays out of band from `Service::call`).
pub struct RefCountedService<S> {
    inner: S,
    outstanding: Rc<Cell<usize>>,
    closed: Cell<bool>,
    /// Invoked once, the moment this service's release drops its entry's refcount
    /// to zero — lets the owning cache reap an entry that quiesced as soon as it
    /// does, rather than waiting for the next unrelated cache miss to sweep it
    /// (spec §4.1: "evict... as soon as an entry quiesces").
    on_quiesce: Rc<Fn()>,
}

impl<S> RefCountedService<S> {
    fn new(inner: S, outstanding: Rc<Cell<usize>>, on_quiesce: Rc<Fn()>) -> RefCountedService<S> {
        outstanding.set(outstanding.get() + 1);
        RefCountedService {
            inner,
            outstanding,
            closed: Cell::new(false),
            on_quiesce,
        }
    }

    /// Releases this service's pin on its cache entry. Idempotent: calling it more
    /// than once only decrements the refcount the first time (spec §8's refcount
    /// integrity law: `outstanding == acquired - closed`).
    pub fn close(&self) {
        if !self.closed.replace(true) {
            let remaining = self.outstanding.get().saturating_sub(1);
            self.outstanding.set(remaining);
            if remaining == 0 {
                (self.on_quiesce)();
            }
        }
    }
}

impl<S> Drop for RefCountedService<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<Req, S: Service<Request = Req, Error = Error>> Service for RefCountedService<S> {
    type Request = Req;
    type Response = S::Response;
    type Error = Error;
    type Future = S::Future;

    fn call(&self, req: Req) -> Self::Future {
        self.inner.call(req)
    }
}

impl<Req, S: Service<Request = Req, Error = Error>> ReleasableService for RefCountedService<S> {
    fn close(&self) {
        RefCountedService::close(self)
    }
}

struct Entry<Conn, S> {
    factory: Rc<ServiceFactory<Conn, S>>,
    outstanding: Rc<Cell<usize>>,
    /// Shared with every `RefCountedService` produced against this entry, so any of
    /// them quiescing it triggers a reap on the owning cache.
    on_quiesce: Rc<Fn()>,
}

impl<Conn, S> Clone for Entry<Conn, S> {
    fn clone(&self) -> Self {
        Entry {
            factory: self.factory.clone(),
            outstanding: self.outstanding.clone(),
            on_quiesce: self.on_quiesce.clone(),
        }
    }
}

#[derive(Clone)]
struct Stats {
    size: tacho::Gauge,
    misses: tacho::Counter,
    evictions: tacho::Counter,
    idle: tacho::Gauge,
}

impl Stats {
    fn new(scope: &tacho::Scope) -> Stats {
        let scope = scope.clone().prefixed("cache");
        Stats {
            size: scope.gauge("size"),
            misses: scope.counter("misses"),
            evictions: scope.counter("evictions"),
            idle: scope.gauge("idle"),
        }
    }
}

struct Inner<K, Conn, S> {
    entries: HashMap<K, Entry<Conn, S>>,
    /// Recency order, least-recently-used at the front.
    order: VecDeque<K>,
    capacity: usize,
    closed: bool,
    stats: Stats,
}

/// A bounded cache mapping key `K` to a reference-counted `ServiceFactory`.
///
/// `K`'s equality must follow the domain semantics the caller intends (bound-name
/// identity or DTab-pair structural equality, per spec §4.1) — this type only
/// requires `Eq + Hash + Clone`.
pub struct ServiceFactoryCache<K, Conn, S> {
    inner: Rc<RefCell<Inner<K, Conn, S>>>,
}

impl<K, Conn, S> Clone for ServiceFactoryCache<K, Conn, S> {
    fn clone(&self) -> Self {
        ServiceFactoryCache { inner: self.inner.clone() }
    }
}

impl<K, Conn, S> ServiceFactoryCache<K, Conn, S>
where
    K: Eq + Hash + Clone + 'static,
    Conn: 'static,
    S: Service<Error = Error> + 'static,
{
    pub fn new(capacity: usize, scope: &tacho::Scope) -> ServiceFactoryCache<K, Conn, S> {
        ServiceFactoryCache {
            inner: Rc::new(RefCell::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                capacity,
                closed: false,
                stats: Stats::new(scope),
            })),
        }
    }

    /// Looks up (or builds) the factory for `key`, then applies it to `conn`.
    ///
    /// `build` runs outside the cache's critical section (spec §4.1/§5): at most
    /// one builder invocation is ever used per key, but a racing concurrent first
    /// miss may run `build` twice; the loser's factory is discarded (closed
    /// asynchronously) and the race's winner is used for both calls' `apply`.
    pub fn apply<B>(&self, key: K, conn: Conn, build: B) -> FactoryFuture<RefCountedService<S>>
    where
        B: FnOnce(&K) -> Rc<ServiceFactory<Conn, S>>,
    {
        if let Some(entry) = self.touch(&key) {
            return self.apply_entry(entry, conn);
        }

        self.inner.borrow_mut().stats.misses.incr(1);
        let factory = build(&key);

        let entry = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Box::new(future::err(Error::ServiceClosed));
            }
            if let Some(existing) = inner.entries.get(&key).cloned() {
                // Lost the race: a concurrent first-miss already inserted. Our
                // freshly-built factory is unused; close it and use the survivor.
                drop(inner);
                let _ = factory.close(DEFAULT_CLOSE_DEADLINE_MS);
                existing
            } else {
                let cache = self.clone();
                let entry = Entry {
                    factory,
                    outstanding: Rc::new(Cell::new(0)),
                    on_quiesce: Rc::new(move || cache.reap_idle()),
                };
                inner.entries.insert(key.clone(), entry.clone());
                inner.order.push_back(key.clone());
                inner.stats.size.set(inner.entries.len());
                Self::evict_if_over_capacity(&mut inner);
                entry
            }
        };
        self.touch(&key);
        self.apply_entry(entry, conn)
    }

    fn apply_entry(&self, entry: Entry<Conn, S>, conn: Conn) -> FactoryFuture<RefCountedService<S>> {
        let outstanding = entry.outstanding.clone();
        let on_quiesce = entry.on_quiesce.clone();
        Box::new(entry.factory.apply(conn).map(move |s| RefCountedService::new(s, outstanding, on_quiesce)))
    }

    /// Moves `key` to the most-recently-used end of the recency order, returning
    /// its entry if present.
    fn touch(&self, key: &K) -> Option<Entry<Conn, S>> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner.entries.get(key).cloned();
        if entry.is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            inner.order.push_back(key.clone());
        }
        entry
    }

    /// Evicts the least-recently-used quiesced entry if capacity is exceeded.
    /// Overshoot is permitted (spec §4.1) when every entry still has outstanding
    /// services; the next entry to quiesce will be evicted retroactively by
    /// `reap_idle`.
    fn evict_if_over_capacity(inner: &mut Inner<K, Conn, S>) {
        if inner.entries.len() <= inner.capacity {
            return;
        }
        if let Some(key) = Self::find_evictable(inner) {
            Self::evict(inner, &key);
        }
    }

    fn find_evictable(inner: &Inner<K, Conn, S>) -> Option<K> {
        inner.order.iter().find(|k| {
            inner.entries.get(*k).map(|e| e.outstanding.get() == 0).unwrap_or(false)
        }).cloned()
    }

    fn evict(inner: &mut Inner<K, Conn, S>, key: &K) {
        if let Some(entry) = inner.entries.remove(key) {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            inner.stats.size.set(inner.entries.len());
            inner.stats.evictions.incr(1);
            let _ = entry.factory.close(DEFAULT_CLOSE_DEADLINE_MS);
        }
    }

    /// Re-checks for evictable entries once an entry's refcount reaches zero,
    /// catching the case where an over-capacity insertion had to be permitted as a
    /// temporary overshoot (spec §4.1).
    pub fn reap_idle(&self) {
        let mut inner = self.inner.borrow_mut();
        while inner.entries.len() > inner.capacity {
            match Self::find_evictable(&inner) {
                Some(key) => Self::evict(&mut inner, &key),
                None => break,
            }
        }
        let idle = inner
            .entries
            .values()
            .filter(|e| e.outstanding.get() == 0)
            .count();
        inner.stats.idle.set(idle);
    }

    /// True if any cached factory reports available, or the cache is empty (spec
    /// §4.1, §9's resolved Open Question).
    pub fn is_available(&self) -> bool {
        let inner = self.inner.borrow();
        inner.entries.is_empty() || inner.entries.values().any(|e| e.factory.is_available())
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Closes every cached entry and refuses further misses (spec §4.1).
    pub fn close(&self, deadline_ms: u64) -> CloseFuture {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        let closes: Vec<CloseFuture> = inner
            .entries
            .drain()
            .map(|(_, entry)| entry.factory.close(deadline_ms))
            .collect();
        inner.order.clear();
        inner.stats.size.set(0);
        Box::new(future::join_all(closes).map(|_| ()))
    }
}
