//! Observer hooks fired by dispatchers.
//!
//! Hooks are optional; scheduling behaves identically without them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::AlertDefinitionKey;

/// Called once per completed evaluation fold with the applied tick.
pub type EvalAppliedFn = Arc<dyn Fn(&AlertDefinitionKey, DateTime<Utc>) + Send + Sync>;

/// Called once when a dispatcher has acknowledged a stop.
pub type StopAppliedFn = Arc<dyn Fn(&AlertDefinitionKey) + Send + Sync>;

/// A set of optional scheduler hooks.
#[derive(Clone, Default)]
pub struct SchedulerObserver {
    eval_applied: Option<EvalAppliedFn>,
    stop_applied: Option<StopAppliedFn>,
}

impl SchedulerObserver {
    /// Creates an observer with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the evaluation hook.
    #[must_use]
    pub fn on_eval_applied<F>(mut self, f: F) -> Self
    where
        F: Fn(&AlertDefinitionKey, DateTime<Utc>) + Send + Sync + 'static,
    {
        self.eval_applied = Some(Arc::new(f));
        self
    }

    /// Sets the stop hook.
    #[must_use]
    pub fn on_stop_applied<F>(mut self, f: F) -> Self
    where
        F: Fn(&AlertDefinitionKey) + Send + Sync + 'static,
    {
        self.stop_applied = Some(Arc::new(f));
        self
    }

    pub(crate) fn eval_applied(&self, key: &AlertDefinitionKey, tick: DateTime<Utc>) {
        if let Some(f) = &self.eval_applied {
            f(key, tick);
        }
    }

    pub(crate) fn stop_applied(&self, key: &AlertDefinitionKey) {
        if let Some(f) = &self.stop_applied {
            f(key);
        }
    }
}

impl fmt::Debug for SchedulerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerObserver")
            .field("eval_applied", &self.eval_applied.is_some())
            .field("stop_applied", &self.stop_applied.is_some())
            .finish()
    }
}
