//! Visibility job: distance-based membership with hysteresis.
//!
//! A subscriber is visible when both axis offsets from the camera are below
//!   (camera view size + subscriber visible size) * multiplier
//! where the multiplier is the enter value for an invisible subscriber and
//! the larger exit value for a visible one. Re-evaluation is rate limited;
//! catching a camera forces an immediate pass.

use crate::{
    config::VisibilityConfig,
    dispatch::{isolate, JobDispatch, JobWork, Subscription, TickContext},
    scope::ScopeLookup,
    subscriber::{SubscriberKey, SubscriberRef},
    types::{Priority, Seconds, Vec2},
};
use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::{Rc, Weak},
};

pub const VISIBILITY_PRIORITY: Priority = 0;

/// "Has visibility".
pub trait Visible {
    fn visible_size(&self) -> f32;

    fn on_visible(&self) -> anyhow::Result<()>;

    fn on_invisible(&self) -> anyhow::Result<()>;
}

/// Exposes a 2D position.
pub trait Positioned {
    fn position(&self) -> Vec2;
}

/// "Is a camera-like viewpoint".
pub trait Viewpoint {
    fn position(&self) -> Vec2;

    fn view_size(&self) -> f32;
}

/// What the visibility job keeps per subscriber: both capabilities.
pub struct VisibleTarget {
    pub visible:    Rc<dyn Visible>,
    pub positioned: Rc<dyn Positioned>,
}

/// Opens at most once per interval of host time.
struct RateGate {
    interval: Seconds,
    next_at:  Cell<Option<Seconds>>,
}

impl RateGate {
    fn new(hz: f64) -> Self {
        Self { interval: 1.0 / hz, next_at: Cell::new(None) }
    }

    fn is_open(&self, now: Seconds) -> bool {
        self.next_at.get().is_none_or(|at| now >= at)
    }

    fn pass(&self, now: Seconds) {
        self.next_at.set(Some(now + self.interval));
    }
}

pub struct VisibilityWork {
    scope:            Rc<dyn ScopeLookup>,
    camera:           RefCell<Option<Weak<dyn Viewpoint>>>,
    visible:          RefCell<HashSet<SubscriberKey>>,
    gate:             RateGate,
    enter_multiplier: f32,
    exit_multiplier:  f32,
    evaluations:      Cell<u64>,
}

impl VisibilityWork {
    pub fn new(config: &VisibilityConfig, scope: Rc<dyn ScopeLookup>) -> Self {
        Self {
            scope,
            camera:           RefCell::new(None),
            visible:          RefCell::new(HashSet::new()),
            gate:             RateGate::new(config.refresh_hz),
            enter_multiplier: config.enter_multiplier,
            exit_multiplier:  config.exit_multiplier,
            evaluations:      Cell::new(0),
        }
    }

    pub fn is_visible(&self, subscriber: &SubscriberRef) -> bool {
        self.visible.borrow().contains(&SubscriberKey::of(subscriber))
    }

    pub fn visible_count(&self) -> usize {
        self.visible.borrow().len()
    }

    pub fn has_camera(&self) -> bool {
        self.live_camera().is_some()
    }

    /// Completed evaluation passes.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.get()
    }

    fn live_camera(&self) -> Option<Rc<dyn Viewpoint>> {
        self.camera.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// The cached camera, or a freshly caught one flagged `true`.
    fn camera(&self) -> Option<(Rc<dyn Viewpoint>, bool)> {
        if let Some(camera) = self.live_camera() {
            return Some((camera, false));
        }
        let camera = self.scope.catch_viewpoint()?;
        *self.camera.borrow_mut() = Some(Rc::downgrade(&camera));
        log::debug!("job={} caught camera", Self::NAME);
        Some((camera, true))
    }

    /// One subscriber's membership test. Runs under `isolate` as a whole,
    /// queries included.
    fn evaluate(&self, sub: &Subscription<VisibleTarget>, camera: &dyn Viewpoint) -> anyhow::Result<()> {
        let target = sub.target();
        let was_visible = self.visible.borrow().contains(&sub.key());
        let multiplier = if was_visible { self.exit_multiplier } else { self.enter_multiplier };
        let threshold = (camera.view_size() + target.visible.visible_size()) * multiplier;
        let offset = (target.positioned.position() - camera.position()).abs();
        let is_visible = offset.x < threshold && offset.y < threshold;

        if is_visible == was_visible {
            return Ok(());
        }
        if is_visible {
            self.visible.borrow_mut().insert(sub.key());
            target.visible.on_visible()
        } else {
            self.visible.borrow_mut().remove(&sub.key());
            target.visible.on_invisible()
        }
    }
}

impl JobWork for VisibilityWork {
    type Target = VisibleTarget;

    const NAME: &'static str = "visibility";

    fn priority(&self) -> Priority {
        VISIBILITY_PRIORITY
    }

    /// Needs both "has visibility" and a position.
    fn accept(&self, candidate: &SubscriberRef) -> Option<Rc<VisibleTarget>> {
        let visible = candidate.clone().visibility()?;
        let positioned = candidate.clone().positioned()?;
        Some(Rc::new(VisibleTarget { visible, positioned }))
    }

    fn on_unsubscribe(&self, target: &Subscription<VisibleTarget>, _count: usize) {
        self.visible.borrow_mut().remove(&target.key());
    }

    fn to_work(
        &self,
        subscribers: &[Subscription<VisibleTarget>],
        ctx: &TickContext<'_>,
    ) -> anyhow::Result<()> {
        let Some((camera, caught)) = self.camera() else {
            return Ok(());
        };
        if !caught && !self.gate.is_open(ctx.now) {
            return Ok(());
        }
        self.gate.pass(ctx.now);

        for sub in subscribers {
            isolate(Self::NAME, sub.name(), || self.evaluate(sub, camera.as_ref()));
        }
        self.evaluations.set(self.evaluations.get() + 1);
        Ok(())
    }
}

pub type VisibilityJob = JobDispatch<VisibilityWork>;
