//! Subscriber contract.
//!
//! RULE: A job never inspects a subscriber's concrete type.
//! Each capability is an explicit query on `Subscriber`; a job accepts a
//! candidate only if the query for its capability answers `Some`.

use crate::{
    self_update::SelfUpdate,
    simulation_step::{PhysicsWorld, SimulationStep},
    visibility::{Positioned, Viewpoint, Visible},
};
use std::rc::Rc;

/// A shared handle to anything that may subscribe to jobs.
pub type SubscriberRef = Rc<dyn Subscriber>;

/// Any object owned by the external lifecycle layer.
///
/// Capability queries take `self: Rc<Self>` so the job can keep the
/// subscriber alive as the capability trait object. Implementors override
/// only the capabilities they have, each as `Some(self)`.
pub trait Subscriber: 'static {
    /// Name used in log lines.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Per-job eligibility veto, consulted once per subscribe request.
    fn is_suitable_for_job(&self, _job: &str) -> bool {
        true
    }

    fn self_update(self: Rc<Self>) -> Option<Rc<dyn SelfUpdate>> {
        None
    }

    fn simulation_step(self: Rc<Self>, _world: PhysicsWorld) -> Option<Rc<dyn SimulationStep>> {
        None
    }

    fn visibility(self: Rc<Self>) -> Option<Rc<dyn Visible>> {
        None
    }

    fn positioned(self: Rc<Self>) -> Option<Rc<dyn Positioned>> {
        None
    }

    fn viewpoint(self: Rc<Self>) -> Option<Rc<dyn Viewpoint>> {
        None
    }
}

/// Identity of a subscriber: the address of its shared allocation.
///
/// Every capability handle derived from the same `Rc` has the same key, and
/// a key stays unique for as long as a job holds the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberKey(usize);

impl SubscriberKey {
    pub fn of<T: ?Sized>(handle: &Rc<T>) -> Self {
        Self(Rc::as_ptr(handle).cast::<()>() as usize)
    }
}
