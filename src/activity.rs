//! A lazy, observable value with push-subscription (spec §3, §4.5, §9).
//!
//! Not present in the teacher's dependency stack; grounded in two of the teacher's
//! own recurring reactive idioms instead of an unrelated ecosystem crate: the
//! explicit polled-state-machine in `resolver/namerd.rs`'s `Addrs` stream, and the
//! `Rc<RefCell<_>>`-guarded, callback-observed contexts in `connector.rs`'s
//! `EndpointCtx` and `balancer/manager.rs`'s `Endpoints`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use super::errors::Error;

type Subscriber<T> = Box<FnMut(&T)>;

struct VarInner<T> {
    value: T,
    subscribers: Vec<Option<Subscriber<T>>>,
    keep_alive: Vec<Box<Any>>,
}

/// A reactive cell holding a value of type `T` that may change over time.
///
/// Subscribing delivers the current value immediately (idempotent-on-subscribe),
/// then on every subsequent `update`, in subscriber-registration order.
///
/// The second field is a queue of subscriber indices a `Subscription` couldn't
/// remove immediately (because it was dropped reentrantly, from within its own
/// notification callback, while `update` already held the first field's borrow).
/// It is guarded by its own `RefCell` precisely so a reentrant `Drop` never needs
/// the first field's borrow at all.
#[derive(Clone)]
pub struct Var<T>(Rc<RefCell<VarInner<T>>>, Rc<RefCell<Vec<usize>>>);

/// An RAII guard for a `Var`/`Activity` subscription. Dropping it deregisters the
/// subscriber; it will not be invoked again.
pub struct Subscription<T> {
    inner: Rc<RefCell<VarInner<T>>>,
    pending_removals: Rc<RefCell<Vec<usize>>>,
    index: usize,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                if let Some(slot) = inner.subscribers.get_mut(self.index) {
                    *slot = None;
                }
            }
            Err(_) => {
                // Reentrant: we're being dropped from within `update`'s own
                // notification pass, which holds the borrow above. Queue the index
                // so `update` can null it out itself once that borrow is released
                // (see `Var::apply_pending_removals`), instead of leaving the slot
                // wrongly restored as still-subscribed.
                self.pending_removals.borrow_mut().push(self.index);
            }
        }
    }
}

impl<T> Var<T> {
    pub fn new(value: T) -> Var<T> {
        Var(
            Rc::new(RefCell::new(VarInner {
                value,
                subscribers: Vec::new(),
                keep_alive: Vec::new(),
            })),
            Rc::new(RefCell::new(Vec::new())),
        )
    }

    /// Keeps `guard` alive for as long as this `Var`'s shared state is — i.e. until
    /// every clone of this `Var` has been dropped — without registering it as a
    /// subscriber. Used by derived reactive values to hold on to the subscriptions
    /// they're built from.
    pub fn retain<A: 'static>(&self, guard: A) {
        self.0.borrow_mut().keep_alive.push(Box::new(guard));
    }

    /// Returns a clone of the current value.
    pub fn sample(&self) -> T
    where
        T: Clone,
    {
        self.0.borrow().value.clone()
    }

    /// Registers `f` to be called with the current value now, and with each
    /// subsequent value on `update`. Returns a guard that deregisters `f` on drop.
    pub fn subscribe<F>(&self, mut f: F) -> Subscription<T>
    where
        F: FnMut(&T) + 'static,
    {
        let index = {
            let mut inner = self.0.borrow_mut();
            f(&inner.value);
            inner.subscribers.push(Some(Box::new(f)));
            inner.subscribers.len() - 1
        };
        Subscription {
            inner: self.0.clone(),
            pending_removals: self.1.clone(),
            index,
        }
    }

    /// Mutates the held value via `f`, then notifies every live subscriber in
    /// registration order.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        {
            let mut inner = self.0.borrow_mut();
            f(&mut inner.value);
            // Subscribers may unsubscribe (dropping their guard) reentrantly from
            // within their own callback; `drain` the list out for the duration of
            // the notification pass so that's not an aliasing borrow of
            // `subscribers`, then restore it. `inner` itself stays borrowed
            // throughout, so `inner.value` is safe to read via a plain field
            // access, no separate borrow of the `RefCell`. A reentrant drop can't
            // clear its own slot here (this borrow is in the way) — it queues
            // itself in `pending_removals` instead, applied below once this
            // borrow is released.
            let mut subs: Vec<Option<Subscriber<T>>> = inner.subscribers.drain(..).collect();
            for slot in subs.iter_mut() {
                if let Some(ref mut cb) = *slot {
                    cb(&inner.value);
                }
            }
            inner.subscribers = subs;
        }
        self.apply_pending_removals();
    }

    /// Nulls out the slot of every subscription whose `Drop` fired reentrantly
    /// during the notification pass `update` just ran, and so couldn't clear its
    /// own slot at the time.
    fn apply_pending_removals(&self) {
        let pending: Vec<usize> = self.1.borrow_mut().drain(..).collect();
        if pending.is_empty() {
            return;
        }
        let mut inner = self.0.borrow_mut();
        for index in pending {
            if let Some(slot) = inner.subscribers.get_mut(index) {
                *slot = None;
            }
        }
    }

    /// Sets the held value outright, notifying subscribers.
    pub fn set(&self, value: T) {
        self.update(|slot| *slot = value);
    }
}

/// A reactive value with states `{Pending, Ok(T), Failed(e)}` (spec §3).
#[derive(Clone, Debug)]
pub enum ActivityState<T> {
    Pending,
    Ok(T),
    Failed(Rc<Error>),
}

impl<T> ActivityState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(*self, ActivityState::Pending)
    }
}

/// `Activity<T>` is `Var<ActivityState<T>>` with a `changes()` accessor named the way
/// spec §3 names it (`run.changes.respond(handler)`).
#[derive(Clone)]
pub struct Activity<T>(Var<ActivityState<T>>);

impl<T> Activity<T> {
    pub fn new(initial: ActivityState<T>) -> Activity<T> {
        Activity(Var::new(initial))
    }

    pub fn pending() -> Activity<T> {
        Activity::new(ActivityState::Pending)
    }

    pub fn ok(value: T) -> Activity<T> {
        Activity::new(ActivityState::Ok(value))
    }

    pub fn failed(err: Error) -> Activity<T> {
        Activity::new(ActivityState::Failed(Rc::new(err)))
    }

    /// The underlying reactive cell, for producers that drive state transitions.
    pub fn var(&self) -> &Var<ActivityState<T>> {
        &self.0
    }

    /// Keeps `guard` alive for as long as this `Activity` is. See `Var::retain`.
    pub fn retain<A: 'static>(&self, guard: A) {
        self.0.retain(guard);
    }

    pub fn sample(&self) -> ActivityState<T>
    where
        T: Clone,
    {
        self.0.sample()
    }

    /// `run.changes.respond(handler)` from spec §3: `handler` is invoked with the
    /// current state immediately, then on every subsequent transition.
    pub fn respond<F>(&self, handler: F) -> Subscription<ActivityState<T>>
    where
        F: FnMut(&ActivityState<T>) + 'static,
    {
        self.0.subscribe(handler)
    }

    pub fn set_ok(&self, value: T) {
        self.0.set(ActivityState::Ok(value));
    }

    pub fn set_failed(&self, err: Error) {
        self.0.set(ActivityState::Failed(Rc::new(err)));
    }
}
