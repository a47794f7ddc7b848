//! Job trait and the generic dispatch base every job is built on.
//!
//! RULES:
//!   - A job's subscriber list is mutated only by whoever holds its guard.
//!     Dispatch holds it for the whole of `ToWork`.
//!   - Subscribe/Unsubscribe arriving during dispatch are queued and applied
//!     right after `ToWork` returns, in the same frame, in arrival order.
//!   - A failing `ToWork` or subscriber callback is logged and swallowed.
//!     Nothing escapes `dispatch()`; the driver has no notion of failure.

use crate::{
    error::JobError,
    guard::ReentrancyGuard,
    registry::JobRegistry,
    subscriber::{SubscriberKey, SubscriberRef},
    types::{FrameNumber, Priority, Seconds},
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

/// Everything a job sees for one driver pass.
pub struct TickContext<'a> {
    pub frame: FrameNumber,
    pub now:   Seconds,
    /// Lets callbacks subscribe and unsubscribe while being dispatched.
    pub jobs:  &'a JobRegistry,
}

/// The object-safe face of a job, as stored by the registry.
pub trait Job: Any {
    fn name(&self) -> &'static str;

    /// Fixed at construction. Higher runs earlier.
    fn priority(&self) -> Priority;

    /// Whether the driver should call `dispatch` this frame.
    fn tick_driven(&self) -> bool;

    fn subscribe(&self, candidate: &SubscriberRef);

    fn unsubscribe(&self, candidate: &SubscriberRef);

    /// `Do()`: one guarded dispatch for the current frame.
    fn dispatch(&self, ctx: &TickContext<'_>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// Job-specific behavior plugged into `JobDispatch`.
pub trait JobWork: Sized + 'static {
    /// The capability handle the job keeps per subscriber.
    type Target: ?Sized + 'static;

    const NAME: &'static str;

    fn priority(&self) -> Priority;

    /// Capability check: `Some` if the candidate can serve this job.
    fn accept(&self, candidate: &SubscriberRef) -> Option<Rc<Self::Target>>;

    fn tick_driven(&self) -> bool {
        true
    }

    /// Called after the subscriber is appended. `count` includes it.
    fn on_subscribe(&self, _target: &Subscription<Self::Target>, _count: usize) {}

    /// Called after the subscriber is removed. `count` excludes it.
    fn on_unsubscribe(&self, _target: &Subscription<Self::Target>, _count: usize) {}

    /// Per-frame work over the current subscribers.
    fn to_work(
        &self,
        subscribers: &[Subscription<Self::Target>],
        ctx: &TickContext<'_>,
    ) -> anyhow::Result<()>;

    /// The whole `Do()`. Override to run `run_once` more than once.
    fn run(&self, base: &JobDispatch<Self>, ctx: &TickContext<'_>) {
        base.run_once(ctx);
    }
}

/// One accepted subscriber, as held by a job.
pub struct Subscription<T: ?Sized> {
    key:    SubscriberKey,
    name:   String,
    target: Rc<T>,
}

impl<T: ?Sized> Subscription<T> {
    pub fn key(&self) -> SubscriberKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Rc<T> {
        &self.target
    }
}

#[derive(Clone)]
enum PendingAction {
    Add(SubscriberRef),
    Remove(SubscriberRef),
}

/// Generic subscriber list with guarded dispatch and a deferred action queue.
pub struct JobDispatch<W: JobWork> {
    work:        W,
    guard:       ReentrancyGuard,
    subscribers: RefCell<Vec<Subscription<W::Target>>>,
    pending:     RefCell<VecDeque<PendingAction>>,
    dispatches:  Cell<u64>,
}

impl<W: JobWork> JobDispatch<W> {
    pub fn new(work: W) -> Self {
        Self {
            work,
            guard:       ReentrancyGuard::new(),
            subscribers: RefCell::new(Vec::new()),
            pending:     RefCell::new(VecDeque::new()),
            dispatches:  Cell::new(0),
        }
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn contains(&self, candidate: &SubscriberRef) -> bool {
        self.position(SubscriberKey::of(candidate)).is_some()
    }

    /// True while `ToWork` (or a direct list mutation) is in progress.
    pub fn is_dispatching(&self) -> bool {
        self.guard.is_locked()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Number of completed `run_once` calls.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.get()
    }

    /// `IsSuitable`: the job's capability check plus the subscriber's veto.
    pub fn is_suitable(&self, candidate: &SubscriberRef) -> Option<Rc<W::Target>> {
        if !candidate.is_suitable_for_job(W::NAME) {
            return None;
        }
        self.work.accept(candidate)
    }

    /// One guarded pass: `ToWork`, isolate failures, drain the queue.
    pub fn run_once(&self, ctx: &TickContext<'_>) {
        let Some(_token) = self.guard.try_acquire() else {
            log::warn!("job={} dispatch re-entered; skipping nested pass", W::NAME);
            return;
        };

        let outcome = {
            let subscribers = self.subscribers.borrow();
            panic::catch_unwind(AssertUnwindSafe(|| self.work.to_work(&subscribers, ctx)))
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("frame={} job={}: {e:#}", ctx.frame, W::NAME),
            Err(payload) => log::error!(
                "frame={} job={} panicked: {}",
                ctx.frame,
                W::NAME,
                panic_message(payload.as_ref())
            ),
        }

        self.drain_pending();
        self.dispatches.set(self.dispatches.get() + 1);
    }

    fn position(&self, key: SubscriberKey) -> Option<usize> {
        self.subscribers.borrow().iter().position(|s| s.key == key)
    }

    fn enqueue(&self, action: PendingAction) {
        self.pending.borrow_mut().push_back(action);
    }

    /// Applies queued actions. Caller must hold the guard. Hooks that
    /// subscribe again land back in the queue and are applied here too.
    fn drain_pending(&self) {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some(PendingAction::Add(candidate)) => self.add_now(&candidate),
                Some(PendingAction::Remove(candidate)) => self.remove_now(&candidate),
                None => break,
            }
        }
    }

    fn add_now(&self, candidate: &SubscriberRef) {
        let key = SubscriberKey::of(candidate);
        if self.position(key).is_some() {
            return;
        }
        let Some(target) = self.is_suitable(candidate) else {
            log::debug!("job={} rejected subscriber '{}'", W::NAME, candidate.name());
            return;
        };

        let subscription = Subscription { key, name: candidate.name().to_string(), target };
        let count = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.push(subscription);
            subscribers.len()
        };
        log::debug!("job={} subscribed '{}' (count={count})", W::NAME, candidate.name());

        let subscribers = self.subscribers.borrow();
        if let Some(added) = subscribers.last() {
            self.work.on_subscribe(added, count);
        }
    }

    fn remove_now(&self, candidate: &SubscriberRef) {
        let Some(index) = self.position(SubscriberKey::of(candidate)) else {
            return;
        };
        let (removed, count) = {
            let mut subscribers = self.subscribers.borrow_mut();
            let removed = subscribers.remove(index);
            (removed, subscribers.len())
        };
        log::debug!("job={} unsubscribed '{}' (count={count})", W::NAME, removed.name);
        self.work.on_unsubscribe(&removed, count);
    }
}

impl<W: JobWork> Job for JobDispatch<W> {
    fn name(&self) -> &'static str {
        W::NAME
    }

    fn priority(&self) -> Priority {
        self.work.priority()
    }

    fn tick_driven(&self) -> bool {
        self.work.tick_driven()
    }

    fn subscribe(&self, candidate: &SubscriberRef) {
        match self.guard.try_acquire() {
            Some(_token) => {
                self.add_now(candidate);
                self.drain_pending();
            }
            None => self.enqueue(PendingAction::Add(candidate.clone())),
        }
    }

    fn unsubscribe(&self, candidate: &SubscriberRef) {
        match self.guard.try_acquire() {
            Some(_token) => {
                self.remove_now(candidate);
                self.drain_pending();
            }
            None => self.enqueue(PendingAction::Remove(candidate.clone())),
        }
    }

    fn dispatch(&self, ctx: &TickContext<'_>) {
        self.work.run(self, ctx);
    }

    fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runs one subscriber callback, containing both errors and panics.
/// Returns whether the callback succeeded.
pub fn isolate<F>(job: &'static str, subscriber: &str, callback: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let source = match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => return true,
        Ok(Err(e)) => e,
        Err(payload) => anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())),
    };
    let failure = JobError::CallbackFailed { job, subscriber: subscriber.to_string(), source };
    log::error!("{failure}");
    false
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
