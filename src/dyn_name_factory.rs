//! `DynNameFactory`: the per-bound-name state machine that queues requests while a
//! name is pending and dispatches them once bound (spec §4.2).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use futures::unsync::oneshot;
use futures::{future, Async, Future, Poll};
use tokio_core::reactor::Handle;
use tokio_service::Service;

use super::activity::{Activity, ActivityState, Subscription};
use super::errors::Error;
use super::name::NameBound;
use super::service::{CloseFuture, FactoryFuture, ReleasableService, ServiceFactory};
use super::tracer::NameTracer;

/// Wraps a downstream `Service` so that every request-time invocation records the
/// successful binding into the tracer, not merely service acquisition, since one
/// `Service` may outlive many trace spans (spec §4.2). Forwards everything else by
/// composition, never inheritance.
pub struct TracingService<S> {
    inner: S,
    bound: NameBound,
    tracer: NameTracer,
}

impl<S> TracingService<S> {
    fn new(inner: S, bound: NameBound, tracer: NameTracer) -> TracingService<S> {
        TracingService { inner, bound, tracer }
    }
}

impl<Req, S: Service<Request = Req, Error = Error>> Service for TracingService<S> {
    type Request = Req;
    type Response = S::Response;
    type Error = Error;
    type Future = S::Future;

    fn call(&self, req: Req) -> Self::Future {
        self.tracer.record_ok(&self.bound);
        self.inner.call(req)
    }
}

impl<S: ReleasableService> ReleasableService for TracingService<S> {
    fn close(&self) {
        self.inner.close();
    }
}

struct QueueEntry<Conn, RawS> {
    token: u64,
    conn: Conn,
    sender: oneshot::Sender<Result<TracingService<RawS>, Error>>,
}

enum State<Conn, RawS> {
    Pending(VecDeque<QueueEntry<Conn, RawS>>),
    Named(NameBound),
    Failed(Rc<Error>),
    Closed,
}

struct Inner<Conn, RawS> {
    state: State<Conn, RawS>,
    next_token: u64,
}

/// A still-pending `apply`, queued behind a name resolution. The Rust equivalent of
/// Twitter Future's interrupt handler: `cancel` is the caller-invoked counterpart to
/// a promise's `raise`, since plain `futures = "0.1"` has no built-in interrupt
/// mechanism (spec §5's cancellation rules).
pub struct QueuedApply<Conn, RawS> {
    receiver: oneshot::Receiver<Result<TracingService<RawS>, Error>>,
    core: Core<Conn, RawS>,
    token: u64,
}

impl<Conn, RawS> QueuedApply<Conn, RawS> {
    /// Interrupts this apply with `cause`, atomically removing it from the queue and
    /// failing it with `CancelledConnection(cause)`. A no-op if the binding already
    /// resolved and this entry was already drained — first-completer-wins, per spec
    /// §5 (the caller still observes whatever outcome reached the promise first).
    pub fn cancel(&self, cause: Error) {
        let entry = {
            let mut inner = self.core.inner.borrow_mut();
            match inner.state {
                State::Pending(ref mut queue) => {
                    queue.iter().position(|e| e.token == self.token).map(|pos| queue.remove(pos).unwrap())
                }
                _ => None,
            }
        };
        if let Some(entry) = entry {
            let _ = entry.sender.send(Err(Error::CancelledConnection { cause: Box::new(cause) }));
        }
    }
}

impl<Conn, RawS> Future for QueuedApply<Conn, RawS> {
    type Item = TracingService<RawS>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self.receiver.poll() {
            Ok(Async::Ready(Ok(service))) => Ok(Async::Ready(service)),
            Ok(Async::Ready(Err(e))) => Err(e),
            Ok(Async::NotReady) => Ok(Async::NotReady),
            // The sender was dropped without sending, which `Core` never does
            // deliberately (`close` always sends `ServiceClosed` before dropping the
            // queue); treat it the same way defensively.
            Err(oneshot::Canceled) => Err(Error::ServiceClosed),
        }
    }
}

/// Either an immediately-available future (the binding was already `Named`,
/// `Failed`, or `Closed`) or a queued apply awaiting the binding. Exposes `cancel`
/// uniformly; it is a no-op on the non-queued variants.
pub enum PendingOutcome<Conn, RawS> {
    Ready(FactoryFuture<TracingService<RawS>>),
    Queued(QueuedApply<Conn, RawS>),
}

impl<Conn, RawS> PendingOutcome<Conn, RawS> {
    pub fn cancel(&self, cause: Error) {
        if let PendingOutcome::Queued(ref q) = *self {
            q.cancel(cause);
        }
    }
}

impl<Conn, RawS> Future for PendingOutcome<Conn, RawS> {
    type Item = TracingService<RawS>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match *self {
            PendingOutcome::Ready(ref mut f) => f.poll(),
            PendingOutcome::Queued(ref mut q) => q.poll(),
        }
    }
}

/// The shared, `Rc`-backed core of a `DynNameFactory`: everything that must be
/// reachable both from `apply`/`close` calls and from the `Activity` subscription's
/// callback (spec §5: the `RefCell` borrow scope *is* the monitor — state mutation
/// borrows, mutates, and drops the borrow before invoking any queued promise or
/// constructing a downstream service).
struct Core<Conn, RawS> {
    inner: Rc<RefCell<Inner<Conn, RawS>>>,
    new_service: Rc<Fn(NameBound, Conn) -> FactoryFuture<RawS>>,
    tracer: NameTracer,
    handle: Handle,
}

impl<Conn, RawS> Clone for Core<Conn, RawS> {
    fn clone(&self) -> Self {
        Core {
            inner: self.inner.clone(),
            new_service: self.new_service.clone(),
            tracer: self.tracer.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<Conn, RawS> Core<Conn, RawS>
where
    Conn: 'static,
    RawS: Service<Error = Error> + 'static,
{
    fn apply_named(&self, name: NameBound, conn: Conn) -> FactoryFuture<TracingService<RawS>> {
        let tracer = self.tracer.clone();
        let trace_bound = name.clone();
        Box::new((self.new_service)(name, conn).map(move |s| TracingService::new(s, trace_bound, tracer)))
    }

    fn apply_cancelable(&self, conn: Conn) -> PendingOutcome<Conn, RawS> {
        enum Branch {
            Named(NameBound),
            Failed(Rc<Error>),
            Closed,
            Queue,
        }

        let branch = {
            let inner = self.inner.borrow();
            match inner.state {
                State::Named(ref n) => Branch::Named(n.clone()),
                State::Failed(ref e) => Branch::Failed(e.clone()),
                State::Closed => Branch::Closed,
                State::Pending(_) => Branch::Queue,
            }
        };

        match branch {
            Branch::Named(n) => PendingOutcome::Ready(self.apply_named(n, conn)),
            Branch::Failed(e) => {
                self.tracer.record_failure(&e);
                PendingOutcome::Ready(Box::new(future::err((*e).clone())))
            }
            Branch::Closed => PendingOutcome::Ready(Box::new(future::err(Error::ServiceClosed))),
            Branch::Queue => {
                let (sender, receiver) = oneshot::channel();
                let token = {
                    let mut inner = self.inner.borrow_mut();
                    let token = inner.next_token;
                    inner.next_token += 1;
                    if let State::Pending(ref mut queue) = inner.state {
                        queue.push_back(QueueEntry { token, conn, sender });
                    }
                    token
                };
                PendingOutcome::Queued(QueuedApply { receiver, core: self.clone(), token })
            }
        }
    }

    /// Drains the pending queue on a `Pending -> Named` transition by delegating
    /// each queued apply to a fresh `apply` call, preserving the tracer-wrapping
    /// invariant (spec §4.2). The delegated futures are spawned on the reactor
    /// handle, since nothing else drives them to completion once queued.
    fn drain_to_named(&self, name: NameBound) {
        let drained = {
            let mut inner = self.inner.borrow_mut();
            if let State::Closed = inner.state {
                return;
            }
            // Always lands in `Named(name)`, whether the previous state was
            // `Pending` (nothing queued yet), `Named` (re-resolution), or `Failed`
            // (recovery) — only `Pending` has a queue worth draining.
            match mem::replace(&mut inner.state, State::Named(name.clone())) {
                State::Pending(queue) => Some(queue),
                _ => None,
            }
        };

        if let Some(queue) = drained {
            for entry in queue {
                let fut = self.apply_named(name.clone(), entry.conn);
                let sender = entry.sender;
                self.handle.spawn(fut.then(move |res| {
                    let _ = sender.send(res);
                    Ok(())
                }));
            }
        }
    }

    /// Drains the pending queue on a `Pending -> Failed` transition. Each queued
    /// promise is failed with the underlying error, unwrapped from the internal
    /// `Naming` marker — present only so the tracer sees the failure's true kind
    /// rather than a generic label (spec §4.2/§7.1).
    fn drain_to_failed(&self, err: Rc<Error>) {
        let drained = {
            let mut inner = self.inner.borrow_mut();
            if let State::Closed = inner.state {
                return;
            }
            match mem::replace(&mut inner.state, State::Failed(err.clone())) {
                State::Pending(queue) => Some(queue),
                _ => None,
            }
        };

        if let Some(queue) = drained {
            for entry in queue {
                let marker = Error::Naming(Box::new((*err).clone()));
                let unwrapped = marker.unwrap_naming();
                self.tracer.record_failure(&unwrapped);
                let _ = entry.sender.send(Err(unwrapped));
            }
        }
    }

    fn on_activity(&self, state: &ActivityState<NameBound>) {
        match *state {
            // The backing `Activity` never regresses to `Pending` once it has
            // reached `Ok`/`Failed` (spec §3's invariant); nothing to do here beyond
            // the initial state this factory is constructed with.
            ActivityState::Pending => {}
            ActivityState::Ok(ref n) => self.drain_to_named(n.clone()),
            ActivityState::Failed(ref e) => self.drain_to_failed(e.clone()),
        }
    }

    fn close(&self) {
        let previous = {
            let mut inner = self.inner.borrow_mut();
            mem::replace(&mut inner.state, State::Closed)
        };
        if let State::Pending(queue) = previous {
            for entry in queue {
                let _ = entry.sender.send(Err(Error::ServiceClosed));
            }
        }
    }

    fn is_available(&self) -> bool {
        matches!(self.inner.borrow().state, State::Named(_))
    }
}

/// Holds a single bound name's `Activity` and queues requests until it resolves
/// (spec §4.2). Implements `ServiceFactory` itself so a `ServiceFactoryCache` keyed
/// by DTab pair can manage `DynNameFactory` instances uniformly alongside endpoint
/// factories keyed by bound name (spec §4.4).
pub struct DynNameFactory<Conn, RawS> {
    core: Core<Conn, RawS>,
    subscription: RefCell<Option<Subscription<ActivityState<NameBound>>>>,
}

impl<Conn, RawS> DynNameFactory<Conn, RawS>
where
    Conn: 'static,
    RawS: Service<Error = Error> + 'static,
{
    pub fn new(
        activity: Activity<NameBound>,
        new_service: Rc<Fn(NameBound, Conn) -> FactoryFuture<RawS>>,
        tracer: NameTracer,
        handle: Handle,
    ) -> DynNameFactory<Conn, RawS> {
        let inner = Rc::new(RefCell::new(Inner {
            state: State::Pending(VecDeque::new()),
            next_token: 0,
        }));
        let core = Core { inner, new_service, tracer, handle };

        let subscription = {
            let core = core.clone();
            activity.respond(move |state| core.on_activity(state))
        };

        DynNameFactory { core, subscription: RefCell::new(Some(subscription)) }
    }

    /// Like `ServiceFactory::apply`, but returns a handle that can be interrupted
    /// while the binding is still pending (spec §5's cancellation rules / S6).
    pub fn apply_cancelable(&self, conn: Conn) -> PendingOutcome<Conn, RawS> {
        self.core.apply_cancelable(conn)
    }
}

impl<Conn, RawS> ServiceFactory<Conn, TracingService<RawS>> for DynNameFactory<Conn, RawS>
where
    Conn: 'static,
    RawS: Service<Error = Error> + 'static,
{
    fn apply(&self, conn: Conn) -> FactoryFuture<TracingService<RawS>> {
        Box::new(self.core.apply_cancelable(conn))
    }

    fn close(&self, _deadline_ms: u64) -> CloseFuture {
        self.core.close();
        self.subscription.borrow_mut().take();
        Box::new(future::ok(()))
    }

    fn is_available(&self) -> bool {
        self.core.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use tokio_core::reactor::Core as ReactorCore;

    use super::super::activity::Var;
    use super::super::dtab::DTab;
    use super::super::name::Addr;
    use super::super::path::Path;
    use super::super::tracer::TraceValue;

    struct MockService(Rc<StdRefCell<u32>>);
    impl Service for MockService {
        type Request = ();
        type Response = ();
        type Error = Error;
        type Future = Box<Future<Item = (), Error = Error>>;
        fn call(&self, _req: ()) -> Self::Future {
            *self.0.borrow_mut() += 1;
            Box::new(future::ok(()))
        }
    }
    impl ReleasableService for MockService {
        fn close(&self) {}
    }

    fn tracer() -> (NameTracer, Rc<RefCell<Vec<(String, TraceValue)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        let sink = Rc::new(move |k: &str, v: TraceValue| log2.borrow_mut().push((k.to_string(), v)));
        (NameTracer::new(Path::from("/s/foo"), DTab::empty(), DTab::empty(), sink), log)
    }

    fn bound() -> NameBound {
        NameBound::new(Var::new(Addr::Bound(vec![])))
    }

    #[test]
    fn named_apply_wraps_service_and_records_tracer_per_call() {
        let reactor = ReactorCore::new().unwrap();
        let (tracer, log) = tracer();
        let calls = Rc::new(StdRefCell::new(0));
        let calls2 = calls.clone();
        let new_service: Rc<Fn(NameBound, ()) -> FactoryFuture<MockService>> =
            Rc::new(move |_n, _c| Box::new(future::ok(MockService(calls2.clone()))));

        let activity = Activity::ok(bound());
        let factory = DynNameFactory::new(activity, new_service, tracer, reactor.handle());

        let svc = factory.apply(()).wait().unwrap();
        svc.call(()).wait().unwrap();
        svc.call(()).wait().unwrap();

        assert_eq!(*calls.borrow(), 2);
        let name_records = log.borrow().iter().filter(|(k, _)| k == "wily.name").count();
        assert_eq!(name_records, 2);
    }

    #[test]
    fn pending_then_ok_drains_queue_in_order() {
        let mut reactor = ReactorCore::new().unwrap();
        let (tracer, _log) = tracer();
        let order = Rc::new(RefCell::new(Vec::new()));
        let new_service: Rc<Fn(NameBound, u32) -> FactoryFuture<MockService>> = {
            let order = order.clone();
            Rc::new(move |_n, c| {
                order.borrow_mut().push(c);
                Box::new(future::ok(MockService(Rc::new(StdRefCell::new(0)))))
            })
        };

        let activity: Activity<NameBound> = Activity::pending();
        let factory = DynNameFactory::new(activity.clone(), new_service, tracer, reactor.handle());

        let f1 = factory.apply_cancelable(1);
        let f2 = factory.apply_cancelable(2);
        let f3 = factory.apply_cancelable(3);

        activity.set_ok(bound());

        let joined = f1.join3(f2, f3);
        reactor.run(joined).unwrap();

        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn pending_then_failed_fails_queue_with_unwrapped_error() {
        let mut reactor = ReactorCore::new().unwrap();
        let (tracer, log) = tracer();
        let new_service: Rc<Fn(NameBound, ()) -> FactoryFuture<MockService>> =
            Rc::new(move |_n, _c| Box::new(future::ok(MockService(Rc::new(StdRefCell::new(0))))));

        let activity: Activity<NameBound> = Activity::pending();
        let factory = DynNameFactory::new(activity.clone(), new_service, tracer, reactor.handle());

        let pending = factory.apply_cancelable(());
        activity.set_failed(Error::ServiceClosed);

        match reactor.run(pending) {
            Err(Error::ServiceClosed) => {}
            other => panic!("expected ServiceClosed, got {:?}", other.is_ok()),
        }
        let failure_records = log.borrow().iter().filter(|(k, _)| k == "wily.failure").count();
        assert_eq!(failure_records, 1);
    }

    #[test]
    fn close_fails_queued_and_future_applies_with_service_closed() {
        let reactor = ReactorCore::new().unwrap();
        let (tracer, _log) = tracer();
        let new_service: Rc<Fn(NameBound, ()) -> FactoryFuture<MockService>> =
            Rc::new(move |_n, _c| Box::new(future::ok(MockService(Rc::new(StdRefCell::new(0))))));

        let activity: Activity<NameBound> = Activity::pending();
        let factory = DynNameFactory::new(activity, new_service, tracer, reactor.handle());

        let pending = factory.apply_cancelable(());
        factory.close(1_000).wait().unwrap();

        match pending.wait() {
            Err(Error::ServiceClosed) => {}
            other => panic!("expected ServiceClosed, got {:?}", other.is_ok()),
        }

        match factory.apply(()).wait() {
            Err(Error::ServiceClosed) => {}
            other => panic!("expected ServiceClosed, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn cancel_removes_from_queue_and_fails_with_cause() {
        let reactor = ReactorCore::new().unwrap();
        let (tracer, _log) = tracer();
        let new_service: Rc<Fn(NameBound, ()) -> FactoryFuture<MockService>> =
            Rc::new(move |_n, _c| Box::new(future::ok(MockService(Rc::new(StdRefCell::new(0))))));

        let activity: Activity<NameBound> = Activity::pending();
        let factory = DynNameFactory::new(activity.clone(), new_service, tracer, reactor.handle());

        let pending = factory.apply_cancelable(());
        pending.cancel(Error::ServiceClosed);

        match pending.wait() {
            Err(Error::CancelledConnection { .. }) => {}
            other => panic!("expected CancelledConnection, got {:?}", other.is_ok()),
        }

        // A subsequent Ok transition must not attempt to satisfy the cancelled entry
        // (it was already removed from the queue).
        activity.set_ok(bound());
    }
}
