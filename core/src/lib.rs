//! Per-frame job dispatch and subscription coordination.
//!
//! Subsystems subscribe to jobs through a `JobRegistry` owned by the
//! application. The host loop calls `JobRegistry::tick` once per frame and
//! every tick-driven job dispatches to its subscribers in priority order.
//! Subscribing or unsubscribing from inside a callback is always safe.

pub mod buffer_pool;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod registry;
pub mod scope;
pub mod self_update;
pub mod simulation_step;
pub mod subscriber;
pub mod types;
pub mod visibility;

pub use dispatch::{Job, JobDispatch, JobWork, Subscription, TickContext};
pub use error::{JobError, JobResult};
pub use registry::{JobEnvironment, JobRegistry};
pub use subscriber::{Subscriber, SubscriberKey, SubscriberRef};
