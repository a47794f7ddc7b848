//! The job registry and per-frame driver.
//!
//! EXECUTION ORDER (fixed at registration, never changed afterwards):
//!   jobs run in descending priority; equal priorities keep registration order.
//!
//! RULES:
//!   - One instance per job type. The registry is owned by the composition
//!     root and passed by reference to every call site.
//!   - `tick()` is the only entry point of the driver. It runs one pass
//!     over the tick-driven jobs and returns; it never waits.
//!   - Asking for an unregistered job type is a configuration defect and
//!     fails immediately with `JobError::JobNotFound`.

use crate::{
    config::JobConfig,
    dispatch::{Job, JobDispatch, TickContext},
    error::{JobError, JobResult},
    guard::ReentrancyGuard,
    scope::ScopeLookup,
    self_update::{SelfUpdateJob, SelfUpdateWork},
    simulation_step::{PhysicsBackend, SimulationStepWork, World2D, World3D},
    subscriber::SubscriberRef,
    types::{FrameNumber, Seconds},
    visibility::{VisibilityJob, VisibilityWork},
};
use std::{any, cell::Cell, rc::Rc};

/// External collaborators the standard job set is wired against.
pub struct JobEnvironment {
    /// Where the visibility job catches its camera.
    pub scope:      Rc<dyn ScopeLookup>,
    pub physics_2d: Option<Box<dyn PhysicsBackend>>,
    pub physics_3d: Option<Box<dyn PhysicsBackend>>,
}

pub struct JobRegistry {
    jobs:    Vec<Box<dyn Job>>,
    frame:   Cell<FrameNumber>,
    ticking: ReentrancyGuard,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs:    Vec::new(),
            frame:   Cell::new(0),
            ticking: ReentrancyGuard::new(),
        }
    }

    /// Build a registry with the standard job set.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: &JobConfig, env: JobEnvironment) -> Self {
        let mut registry = JobRegistry::new();

        registry.register(Box::new(SelfUpdateJob::new(SelfUpdateWork::new(&config.self_update))));

        registry.register(Box::new(JobDispatch::new(step_work::<World3D>(
            config.physics.enable_3d,
            env.physics_3d,
            config.time_scale,
        ))));
        registry.register(Box::new(JobDispatch::new(step_work::<World2D>(
            config.physics.enable_2d,
            env.physics_2d,
            config.time_scale,
        ))));

        registry.register(Box::new(VisibilityJob::new(VisibilityWork::new(
            &config.visibility,
            env.scope,
        ))));

        registry
    }

    /// Insert a job at its priority position. Registering a second job of
    /// the same name is ignored.
    pub fn register(&mut self, job: Box<dyn Job>) {
        if self.jobs.iter().any(|j| j.name() == job.name()) {
            log::warn!("job={} already registered; ignoring duplicate", job.name());
            return;
        }
        let at = self
            .jobs
            .iter()
            .position(|j| j.priority() < job.priority())
            .unwrap_or(self.jobs.len());
        log::debug!("registered job={} priority={} slot={at}", job.name(), job.priority());
        self.jobs.insert(at, job);
    }

    /// `Subscribe<J>(subscriber)`.
    pub fn subscribe<J: Job>(&self, subscriber: &SubscriberRef) -> JobResult<()> {
        self.find::<J>()?.subscribe(subscriber);
        Ok(())
    }

    /// Removes the subscriber from every job; it need not know which
    /// jobs accepted it.
    pub fn unsubscribe(&self, subscriber: &SubscriberRef) {
        for job in &self.jobs {
            job.unsubscribe(subscriber);
        }
    }

    /// Typed access to a registered job.
    pub fn job<J: Job>(&self) -> JobResult<&J> {
        self.find::<J>()?
            .as_any()
            .downcast_ref::<J>()
            .ok_or(JobError::JobNotFound { job: any::type_name::<J>() })
    }

    /// Jobs in execution order.
    pub fn jobs(&self) -> impl Iterator<Item = &dyn Job> {
        self.jobs.iter().map(|j| j.as_ref())
    }

    /// Frames driven so far.
    pub fn frame(&self) -> FrameNumber {
        self.frame.get()
    }

    /// One frame: `dispatch()` every tick-driven job in priority order.
    pub fn tick(&self, now: Seconds) {
        let Some(_token) = self.ticking.try_acquire() else {
            log::warn!("tick() re-entered from inside a job; ignoring");
            return;
        };

        let frame = self.frame.get() + 1;
        self.frame.set(frame);
        let ctx = TickContext { frame, now, jobs: self };

        for job in &self.jobs {
            if !job.tick_driven() {
                continue;
            }
            log::trace!("frame={frame} dispatch job={} subscribers={}", job.name(), job.len());
            job.dispatch(&ctx);
        }
    }

    fn find<J: Job>(&self) -> JobResult<&dyn Job> {
        self.jobs
            .iter()
            .find(|j| j.as_any().is::<J>())
            .map(|j| j.as_ref())
            .ok_or(JobError::JobNotFound { job: any::type_name::<J>() })
    }
}

impl Default for JobRegistry {
    fn default() -> Self { Self::new() }
}

/// Active when the backend is both enabled and supplied, no-op otherwise.
fn step_work<D: crate::simulation_step::Dimension>(
    enabled: bool,
    backend: Option<Box<dyn PhysicsBackend>>,
    time_scale: f64,
) -> SimulationStepWork<D> {
    match (enabled, backend) {
        (true, Some(backend)) => SimulationStepWork::active(backend, time_scale),
        (true, None) => {
            log::warn!("{} enabled but no backend supplied; using no-op step job", D::NAME);
            SimulationStepWork::disabled()
        }
        (false, _) => SimulationStepWork::disabled(),
    }
}
