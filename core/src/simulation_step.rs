//! Simulation step hook, shared by the 2D and 3D physics backends.
//!
//! STAGES (linear, one round per driver frame):
//!   WaitingForFrame -> BeforeSimulate -> (backend steps) -> AfterSimulate
//!   -> WaitingForFrame
//!
//! RULES:
//!   - This job is the only thing that steps the backend. A backend that
//!     still steps itself is rejected every frame with
//!     `JobError::AutoSimulationEnabled`; nothing is stepped.
//!   - The job is tick-driven only while it has subscribers. With none, it
//!     costs nothing and its delta time stays where it was.

use crate::{
    dispatch::{isolate, JobDispatch, JobWork, Subscription, TickContext},
    error::JobError,
    registry::JobRegistry,
    subscriber::SubscriberRef,
    types::{FrameNumber, Priority, Seconds},
};
use std::{cell::Cell, marker::PhantomData, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsWorld {
    TwoD,
    ThreeD,
}

/// Selects one instantiation of the step job.
pub trait Dimension: 'static {
    const NAME: &'static str;
    const WORLD: PhysicsWorld;
    const PRIORITY: Priority;
}

pub struct World2D;
pub struct World3D;

impl Dimension for World2D {
    const NAME: &'static str = "simulation_step_2d";
    const WORLD: PhysicsWorld = PhysicsWorld::TwoD;
    const PRIORITY: Priority = 190;
}

impl Dimension for World3D {
    const NAME: &'static str = "simulation_step_3d";
    const WORLD: PhysicsWorld = PhysicsWorld::ThreeD;
    const PRIORITY: Priority = 200;
}

/// The external physics engine being driven.
pub trait PhysicsBackend {
    fn name(&self) -> &str;

    /// Whether the engine still advances on its own.
    fn auto_simulation(&self) -> bool;

    fn simulate(&self, delta_time: Seconds) -> anyhow::Result<()>;
}

impl<T: PhysicsBackend + ?Sized> PhysicsBackend for Rc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn auto_simulation(&self) -> bool {
        (**self).auto_simulation()
    }

    fn simulate(&self, delta_time: Seconds) -> anyhow::Result<()> {
        (**self).simulate(delta_time)
    }
}

/// "Reacts to a physics step".
pub trait SimulationStep {
    fn before_simulate(&self, step: &StepContext<'_>) -> anyhow::Result<()>;

    fn after_simulate(&self, step: &StepContext<'_>) -> anyhow::Result<()>;
}

pub struct StepContext<'a> {
    /// Scaled seconds the backend is stepped by this frame.
    pub delta_time: Seconds,
    pub frame:      FrameNumber,
    pub jobs:       &'a JobRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    WaitingForFrame,
    BeforeSimulate,
    AfterSimulate,
}

pub struct SimulationStepWork<D: Dimension> {
    /// `None` composes the no-op job for a disabled backend.
    backend:    Option<Box<dyn PhysicsBackend>>,
    time_scale: Cell<f64>,
    attached:   Cell<bool>,
    last_step:  Cell<Option<Seconds>>,
    delta_time: Cell<Seconds>,
    stage:      Cell<StepStage>,
    steps:      Cell<u64>,
    _world:     PhantomData<D>,
}

impl<D: Dimension> SimulationStepWork<D> {
    pub fn active(backend: Box<dyn PhysicsBackend>, time_scale: f64) -> Self {
        Self::with_backend(Some(backend), time_scale)
    }

    /// Accepts no subscribers and never attaches.
    pub fn disabled() -> Self {
        Self::with_backend(None, 1.0)
    }

    fn with_backend(backend: Option<Box<dyn PhysicsBackend>>, time_scale: f64) -> Self {
        Self {
            backend,
            time_scale: Cell::new(time_scale),
            attached:   Cell::new(false),
            last_step:  Cell::new(None),
            delta_time: Cell::new(0.0),
            stage:      Cell::new(StepStage::WaitingForFrame),
            steps:      Cell::new(0),
            _world:     PhantomData,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether the frame hook is currently attached.
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub fn delta_time(&self) -> Seconds {
        self.delta_time.get()
    }

    pub fn stage(&self) -> StepStage {
        self.stage.get()
    }

    /// Manual backend steps performed so far.
    pub fn steps_taken(&self) -> u64 {
        self.steps.get()
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale.get()
    }

    pub fn set_time_scale(&self, scale: f64) {
        self.time_scale.set(scale.max(0.0));
    }

    fn attach(&self) {
        self.attached.set(true);
        self.last_step.set(None);
        log::debug!("job={} hook attached", D::NAME);
    }

    fn detach(&self) {
        self.attached.set(false);
        self.last_step.set(None);
        self.stage.set(StepStage::WaitingForFrame);
        log::debug!("job={} hook detached", D::NAME);
    }
}

impl<D: Dimension> JobWork for SimulationStepWork<D> {
    type Target = dyn SimulationStep;

    const NAME: &'static str = D::NAME;

    fn priority(&self) -> Priority {
        D::PRIORITY
    }

    fn accept(&self, candidate: &SubscriberRef) -> Option<Rc<dyn SimulationStep>> {
        self.backend.as_ref()?;
        candidate.clone().simulation_step(D::WORLD)
    }

    fn tick_driven(&self) -> bool {
        self.attached.get()
    }

    fn on_subscribe(&self, _target: &Subscription<dyn SimulationStep>, count: usize) {
        if count > 0 && !self.attached.get() {
            self.attach();
        }
    }

    fn on_unsubscribe(&self, _target: &Subscription<dyn SimulationStep>, count: usize) {
        if count == 0 && self.attached.get() {
            self.detach();
        }
    }

    fn to_work(
        &self,
        subscribers: &[Subscription<dyn SimulationStep>],
        ctx: &TickContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        if backend.auto_simulation() {
            return Err(JobError::AutoSimulationEnabled { backend: backend.name().to_string() }.into());
        }

        // First frame after attaching steps by zero.
        let last = self.last_step.get().unwrap_or(ctx.now);
        let delta_time = ((ctx.now - last) * self.time_scale.get()).max(0.0);
        self.last_step.set(Some(ctx.now));
        self.delta_time.set(delta_time);

        let step = StepContext { delta_time, frame: ctx.frame, jobs: ctx.jobs };

        self.stage.set(StepStage::BeforeSimulate);
        for sub in subscribers {
            isolate(Self::NAME, sub.name(), || sub.target().before_simulate(&step));
        }

        if let Err(e) = backend.simulate(delta_time) {
            self.stage.set(StepStage::WaitingForFrame);
            return Err(e.context(format!("backend '{}' failed to step", backend.name())));
        }
        self.steps.set(self.steps.get() + 1);

        self.stage.set(StepStage::AfterSimulate);
        for sub in subscribers {
            isolate(Self::NAME, sub.name(), || sub.target().after_simulate(&step));
        }

        self.stage.set(StepStage::WaitingForFrame);
        Ok(())
    }
}

pub type SimulationStepJob<D> = JobDispatch<SimulationStepWork<D>>;
pub type Physics2DStepJob = SimulationStepJob<World2D>;
pub type Physics3DStepJob = SimulationStepJob<World3D>;
