//! Scope lookup: how a job discovers scope-wide singletons such as the
//! camera without holding a direct reference to them.

use crate::{
    subscriber::{Subscriber, SubscriberRef},
    visibility::Viewpoint,
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

pub trait ScopeLookup {
    /// "Catch" the scope's camera-like viewpoint, if one is alive.
    fn catch_viewpoint(&self) -> Option<Rc<dyn Viewpoint>>;
}

/// A flat scope of weakly held objects. Entering does not keep an
/// object alive; dead entries are pruned on lookup.
#[derive(Default)]
pub struct Scope {
    members: RefCell<Vec<Weak<dyn Subscriber>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, member: &SubscriberRef) {
        if !self.contains(member) {
            self.members.borrow_mut().push(Rc::downgrade(member));
        }
    }

    pub fn leave(&self, member: &SubscriberRef) {
        let address = Rc::as_ptr(member).cast::<()>();
        self.members.borrow_mut().retain(|m| m.as_ptr().cast::<()>() != address);
    }

    pub fn contains(&self, member: &SubscriberRef) -> bool {
        let address = Rc::as_ptr(member).cast::<()>();
        self.members.borrow().iter().any(|m| m.as_ptr().cast::<()>() == address)
    }

    /// Live members.
    pub fn len(&self) -> usize {
        self.members.borrow().iter().filter(|m| m.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScopeLookup for Scope {
    fn catch_viewpoint(&self) -> Option<Rc<dyn Viewpoint>> {
        let live: Vec<SubscriberRef> = {
            let mut members = self.members.borrow_mut();
            members.retain(|m| m.strong_count() > 0);
            members.iter().filter_map(Weak::upgrade).collect()
        };
        live.into_iter().find_map(|m| m.viewpoint())
    }
}
