//! Visibility job tests.
//!
//! Tests cover: hysteresis thresholds, transition callbacks, the refresh
//! rate gate, camera catching and re-catching, and the position requirement.

use framejob_core::{
    config::JobConfig,
    registry::{JobEnvironment, JobRegistry},
    scope::{Scope, ScopeLookup},
    types::Vec2,
    visibility::{Positioned, Viewpoint, Visible, VisibilityJob},
    Job, Subscriber, SubscriberRef,
};
use std::{cell::Cell, rc::Rc};

struct Entity {
    position:  Cell<Vec2>,
    size:      f32,
    entered:   Cell<u32>,
    exited:    Cell<u32>,
    positions: bool,
}

impl Entity {
    fn at(x: f32, size: f32) -> Rc<Self> {
        Rc::new(Self {
            position:  Cell::new(Vec2::new(x, 0.0)),
            size,
            entered:   Cell::new(0),
            exited:    Cell::new(0),
            positions: true,
        })
    }

    fn move_to(&self, x: f32) {
        self.place(x, 0.0);
    }

    fn place(&self, x: f32, y: f32) {
        self.position.set(Vec2::new(x, y));
    }

    fn transitions(&self) -> (u32, u32) {
        (self.entered.get(), self.exited.get())
    }
}

impl Subscriber for Entity {
    fn visibility(self: Rc<Self>) -> Option<Rc<dyn Visible>> {
        Some(self)
    }

    fn positioned(self: Rc<Self>) -> Option<Rc<dyn Positioned>> {
        if self.positions {
            Some(self)
        } else {
            None
        }
    }
}

impl Visible for Entity {
    fn visible_size(&self) -> f32 {
        self.size
    }

    fn on_visible(&self) -> anyhow::Result<()> {
        self.entered.set(self.entered.get() + 1);
        Ok(())
    }

    fn on_invisible(&self) -> anyhow::Result<()> {
        self.exited.set(self.exited.get() + 1);
        Ok(())
    }
}

impl Positioned for Entity {
    fn position(&self) -> Vec2 {
        self.position.get()
    }
}

/// Its size query panics every time it is asked.
struct Faulty;

impl Subscriber for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn visibility(self: Rc<Self>) -> Option<Rc<dyn Visible>> {
        Some(self)
    }

    fn positioned(self: Rc<Self>) -> Option<Rc<dyn Positioned>> {
        Some(self)
    }
}

impl Visible for Faulty {
    fn visible_size(&self) -> f32 {
        panic!("size unavailable")
    }

    fn on_visible(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_invisible(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Positioned for Faulty {
    fn position(&self) -> Vec2 {
        Vec2::ZERO
    }
}

struct Camera {
    position:  Vec2,
    view_size: f32,
}

impl Subscriber for Camera {
    fn viewpoint(self: Rc<Self>) -> Option<Rc<dyn Viewpoint>> {
        Some(self)
    }
}

impl Viewpoint for Camera {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn view_size(&self) -> f32 {
        self.view_size
    }
}

fn camera_at(x: f32) -> SubscriberRef {
    Rc::new(Camera { position: Vec2::new(x, 0.0), view_size: 10.0 })
}

fn build(scope: &Rc<Scope>) -> JobRegistry {
    let _ = env_logger::builder().is_test(true).try_init();
    JobRegistry::build(
        &JobConfig::default_test(),
        JobEnvironment {
            scope:      scope.clone() as Rc<dyn ScopeLookup>,
            physics_2d: None,
            physics_3d: None,
        },
    )
}

fn job(jobs: &JobRegistry) -> &VisibilityJob {
    jobs.job::<VisibilityJob>().expect("visibility job registered")
}

#[test]
fn exit_threshold_is_wider_than_entry_threshold() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let near = Entity::at(10.5, 0.0);
    let far = Entity::at(11.5, 0.0);
    jobs.subscribe::<VisibilityJob>(&(near.clone() as SubscriberRef)).unwrap();
    jobs.subscribe::<VisibilityJob>(&(far.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert_eq!(near.transitions(), (1, 0), "10.5 is inside the entry threshold of 11");
    assert_eq!(far.transitions(), (0, 0), "11.5 is outside the entry threshold of 11");

    near.move_to(11.5);
    jobs.tick(1.0);
    assert_eq!(near.transitions(), (1, 0), "11.5 is inside the exit threshold of 12");
    assert_eq!(far.transitions(), (0, 0));

    near.move_to(12.5);
    jobs.tick(2.0);
    assert_eq!(near.transitions(), (1, 1));
    assert_eq!(job(&jobs).work().visible_count(), 0);
}

#[test]
fn exactly_on_the_exit_threshold_is_invisible() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let e = Entity::at(10.5, 0.0);
    jobs.subscribe::<VisibilityJob>(&(e.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert_eq!(e.transitions(), (1, 0));

    e.move_to(12.0);
    jobs.tick(1.0);
    assert_eq!(e.transitions(), (1, 1), "offset 12 is not below the exit threshold of 12");
}

#[test]
fn y_offset_alone_decides_visibility() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let high = Entity::at(0.0, 0.0);
    high.place(0.0, 11.5);
    let low = Entity::at(0.0, 0.0);
    low.place(0.0, 10.5);
    jobs.subscribe::<VisibilityJob>(&(high.clone() as SubscriberRef)).unwrap();
    jobs.subscribe::<VisibilityJob>(&(low.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert_eq!(high.transitions(), (0, 0), "y 11.5 is outside the entry threshold");
    assert_eq!(low.transitions(), (1, 0));

    low.place(0.0, 12.5);
    jobs.tick(1.0);
    assert_eq!(low.transitions(), (1, 1), "y 12.5 is outside the exit threshold");
}

#[test]
fn panicking_query_does_not_starve_later_members() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let faulty: SubscriberRef = Rc::new(Faulty);
    let b = Entity::at(1.0, 0.0);
    jobs.subscribe::<VisibilityJob>(&faulty).unwrap();
    jobs.subscribe::<VisibilityJob>(&(b.clone() as SubscriberRef)).unwrap();

    for frame in 0..5 {
        jobs.tick(f64::from(frame));
    }

    assert_eq!(b.transitions(), (1, 0), "b evaluated despite the earlier panic");
    assert!(!job(&jobs).work().is_visible(&faulty));
    assert_eq!(job(&jobs).len(), 2, "failing members stay subscribed");
    assert_eq!(job(&jobs).work().evaluations(), 5);
}

#[test]
fn subscriber_size_widens_the_threshold() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let big = Entity::at(15.0, 5.0);
    let handle: SubscriberRef = big.clone();
    jobs.subscribe::<VisibilityJob>(&handle).unwrap();

    jobs.tick(0.0);

    assert!(job(&jobs).work().is_visible(&handle), "15 < (10 + 5) * 1.1");
}

#[test]
fn re_evaluation_is_rate_limited() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let e = Entity::at(1.0, 0.0);
    jobs.subscribe::<VisibilityJob>(&(e.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert_eq!(e.transitions(), (1, 0));

    e.move_to(100.0);
    jobs.tick(0.03);
    assert_eq!(e.transitions(), (1, 0), "gate still closed at 30ms");
    assert_eq!(job(&jobs).work().evaluations(), 1);

    jobs.tick(0.07);
    assert_eq!(e.transitions(), (1, 1));
    assert_eq!(job(&jobs).work().evaluations(), 2);
}

#[test]
fn catching_a_camera_evaluates_immediately() {
    let scope = Rc::new(Scope::new());
    let jobs = build(&scope);
    let e = Entity::at(1.0, 0.0);
    jobs.subscribe::<VisibilityJob>(&(e.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert!(!job(&jobs).work().has_camera());
    assert_eq!(job(&jobs).work().evaluations(), 0);

    let camera = camera_at(0.0);
    scope.enter(&camera);
    jobs.tick(0.01);
    assert!(job(&jobs).work().has_camera());
    assert_eq!(e.transitions(), (1, 0));
}

#[test]
fn lost_camera_is_replaced_and_re_evaluated_at_once() {
    let scope = Rc::new(Scope::new());
    let first = camera_at(0.0);
    scope.enter(&first);
    let jobs = build(&scope);
    let e = Entity::at(1.0, 0.0);
    jobs.subscribe::<VisibilityJob>(&(e.clone() as SubscriberRef)).unwrap();

    jobs.tick(0.0);
    assert_eq!(e.transitions(), (1, 0));

    drop(first);
    let second = camera_at(500.0);
    scope.enter(&second);
    jobs.tick(0.01);

    assert_eq!(e.transitions(), (1, 1), "new camera evaluated without waiting for the gate");
}

#[test]
fn unsubscribed_member_leaves_visible_set_silently() {
    let scope = Rc::new(Scope::new());
    let camera = camera_at(0.0);
    scope.enter(&camera);
    let jobs = build(&scope);
    let e = Entity::at(1.0, 0.0);
    let handle: SubscriberRef = e.clone();
    jobs.subscribe::<VisibilityJob>(&handle).unwrap();
    jobs.tick(0.0);
    assert_eq!(job(&jobs).work().visible_count(), 1);

    jobs.unsubscribe(&handle);

    assert_eq!(job(&jobs).work().visible_count(), 0);
    assert_eq!(e.transitions(), (1, 0));
}

#[test]
fn subscriber_without_position_is_rejected() {
    let scope = Rc::new(Scope::new());
    let jobs = build(&scope);
    let ghost = Rc::new(Entity {
        position:  Cell::new(Vec2::ZERO),
        size:      1.0,
        entered:   Cell::new(0),
        exited:    Cell::new(0),
        positions: false,
    });

    jobs.subscribe::<VisibilityJob>(&(ghost as SubscriberRef)).unwrap();

    assert!(job(&jobs).is_empty());
}
