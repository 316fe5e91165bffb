//! Tick-driven evaluation scheduling.
//!
//! - [`Scheduler`]: the top-level loop, built with [`SchedulerBuilder`]
//! - [`plan`]: the pure reconciliation diff it applies on every tick
//! - [`SchedulerObserver`]: optional evaluation and stop hooks

mod dispatcher;
mod observer;
mod registry;
mod ticker;

pub use observer::{EvalAppliedFn, SchedulerObserver, StopAppliedFn};
pub use registry::{plan, ReconcileAction, StopReason};
pub use ticker::{Scheduler, SchedulerBuilder};
