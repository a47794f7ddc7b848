//! Self-update job: at most one update per subscriber per frame id.
//!
//! Each subscriber carries an `UpdateSlot` holding the last frame id it was
//! updated on. A subscriber is *stale* while its slot differs from the
//! job's current id and becomes *current* exactly once per id, before its
//! callback runs. A callback may request that the job repeat this frame
//! (for example after spawning a child that should not wait a full tick);
//! the job then runs another pass under a fresh id.

use crate::{
    config::SelfUpdateConfig,
    dispatch::{isolate, JobDispatch, JobWork, Subscription, TickContext},
    registry::JobRegistry,
    subscriber::SubscriberRef,
    types::{FrameId, FrameNumber, Priority, Seconds},
};
use std::{cell::Cell, rc::Rc};

pub const SELF_UPDATE_PRIORITY: Priority = 100;

/// "Can be self-updated".
pub trait SelfUpdate {
    /// Subscribers that are not ready are skipped and stay stale.
    fn ready_for_update(&self) -> bool {
        true
    }

    fn update_slot(&self) -> &UpdateSlot;

    fn update_frame(&self, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;
}

/// Per-subscriber "already updated on" marker.
#[derive(Debug, Default)]
pub struct UpdateSlot(Cell<FrameId>);

impl UpdateSlot {
    pub fn get(&self) -> FrameId {
        self.0.get()
    }

    pub fn set(&self, id: FrameId) {
        self.0.set(id);
    }
}

/// Passed to every update callback of one pass.
pub struct FrameContext<'a> {
    id:               FrameId,
    frame:            FrameNumber,
    now:              Seconds,
    jobs:             &'a JobRegistry,
    repeat_requested: bool,
}

impl<'a> FrameContext<'a> {
    /// Internal frame id of this pass.
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Driver frame this pass belongs to. Repeat passes share it.
    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    pub fn now(&self) -> Seconds {
        self.now
    }

    pub fn jobs(&self) -> &'a JobRegistry {
        self.jobs
    }

    /// Ask for another pass within the current driver frame.
    pub fn request_repeat(&mut self) {
        self.repeat_requested = true;
    }

    pub fn repeat_requested(&self) -> bool {
        self.repeat_requested
    }
}

pub struct SelfUpdateWork {
    frame_id:          Cell<FrameId>,
    repeat:            Cell<bool>,
    max_repeat_passes: Option<u32>,
}

impl SelfUpdateWork {
    pub fn new(config: &SelfUpdateConfig) -> Self {
        Self {
            frame_id:          Cell::new(0),
            repeat:            Cell::new(false),
            max_repeat_passes: config.max_repeat_passes,
        }
    }

    /// Id of the most recent pass.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id.get()
    }
}

impl JobWork for SelfUpdateWork {
    type Target = dyn SelfUpdate;

    const NAME: &'static str = "self_update";

    fn priority(&self) -> Priority {
        SELF_UPDATE_PRIORITY
    }

    fn accept(&self, candidate: &SubscriberRef) -> Option<Rc<dyn SelfUpdate>> {
        candidate.clone().self_update()
    }

    fn to_work(
        &self,
        subscribers: &[Subscription<dyn SelfUpdate>],
        ctx: &TickContext<'_>,
    ) -> anyhow::Result<()> {
        let id = self.frame_id.get() + 1;
        self.frame_id.set(id);

        let mut frame = FrameContext {
            id,
            frame: ctx.frame,
            now: ctx.now,
            jobs: ctx.jobs,
            repeat_requested: false,
        };

        for sub in subscribers {
            let target = sub.target();
            isolate(Self::NAME, sub.name(), || {
                if !target.ready_for_update() || target.update_slot().get() == id {
                    return Ok(());
                }
                // Mark first: a reentrant path must not update it twice.
                target.update_slot().set(id);
                target.update_frame(&mut frame)
            });
        }

        self.repeat.set(frame.repeat_requested);
        Ok(())
    }

    fn run(&self, base: &JobDispatch<Self>, ctx: &TickContext<'_>) {
        let mut passes: u32 = 0;
        loop {
            self.repeat.set(false);
            base.run_once(ctx);
            passes += 1;

            if !self.repeat.get() {
                break;
            }
            if let Some(cap) = self.max_repeat_passes {
                if passes >= cap {
                    log::warn!(
                        "frame={} job={} repeat requested after {passes} passes; deferring to next frame",
                        ctx.frame,
                        Self::NAME
                    );
                    break;
                }
            }
            log::trace!("frame={} job={} repeat pass {}", ctx.frame, Self::NAME, passes + 1);
        }
    }
}

pub type SelfUpdateJob = JobDispatch<SelfUpdateWork>;
