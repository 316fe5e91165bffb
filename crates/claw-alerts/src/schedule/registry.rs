//! Reconciliation of running dispatchers against the store.
//!
//! [`plan`] is a pure diff between the intervals of the running handles and
//! the definitions just read from the store. [`DefinitionRegistry`] owns the
//! handles and applies the plan.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::dispatcher::{DispatchContext, DispatcherHandle, Offer};
use crate::types::{AlertDefinition, AlertDefinitionKey};

/// Why a running dispatcher is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The definition is gone from the store.
    Deleted,
    /// The definition was paused.
    Paused,
    /// The interval was set to zero.
    Disabled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted => write!(f, "deleted"),
            Self::Paused => write!(f, "paused"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// One step of a reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Start a dispatcher for a definition that has none.
    Start(AlertDefinition),
    /// Replace the dispatcher because the interval changed.
    Restart(AlertDefinition),
    /// Stop the dispatcher.
    Stop {
        /// The definition to stop.
        key: AlertDefinitionKey,
        /// Why it stops.
        reason: StopReason,
    },
    /// Leave the dispatcher running with the refreshed definition.
    Keep(AlertDefinition),
}

impl ReconcileAction {
    /// Returns the key the action applies to.
    #[must_use]
    pub fn key(&self) -> AlertDefinitionKey {
        match self {
            Self::Start(def) | Self::Restart(def) | Self::Keep(def) => def.key(),
            Self::Stop { key, .. } => key.clone(),
        }
    }
}

/// Diffs running dispatchers against the current definitions.
///
/// `running` maps each running definition to the interval its dispatcher was
/// started with. Actions are returned in key order. When `definitions` holds
/// a key twice, the last occurrence wins.
#[must_use]
pub fn plan(running: &BTreeMap<AlertDefinitionKey, i64>, definitions: &[AlertDefinition]) -> Vec<ReconcileAction> {
    let current: BTreeMap<AlertDefinitionKey, &AlertDefinition> =
        definitions.iter().map(|def| (def.key(), def)).collect();

    let mut actions = Vec::new();
    let keys: BTreeSet<&AlertDefinitionKey> = running.keys().chain(current.keys()).collect();

    for key in keys {
        let action = match (running.get(key), current.get(key)) {
            (Some(_), None) => Some(ReconcileAction::Stop {
                key: key.clone(),
                reason: StopReason::Deleted,
            }),
            (Some(_), Some(def)) if def.paused => Some(ReconcileAction::Stop {
                key: key.clone(),
                reason: StopReason::Paused,
            }),
            (Some(_), Some(def)) if def.interval_seconds <= 0 => Some(ReconcileAction::Stop {
                key: key.clone(),
                reason: StopReason::Disabled,
            }),
            (Some(interval), Some(def)) if *interval != def.interval_seconds => {
                Some(ReconcileAction::Restart((*def).clone()))
            }
            (Some(_), Some(def)) => Some(ReconcileAction::Keep((*def).clone())),
            (None, Some(def)) if def.is_schedulable() => Some(ReconcileAction::Start((*def).clone())),
            (None, _) => None,
        };
        actions.extend(action);
    }

    actions
}

/// Counts of what happened to one broadcast tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BroadcastStats {
    /// Ticks queued for evaluation.
    pub(crate) sent: usize,
    /// Ticks not due for their dispatcher.
    pub(crate) not_due: usize,
    /// Due ticks dropped because one was already pending.
    pub(crate) dropped: usize,
    /// Handles whose dispatcher had already exited.
    pub(crate) closed: usize,
}

/// The running dispatchers, keyed by definition.
#[derive(Debug, Default)]
pub(crate) struct DefinitionRegistry {
    handles: BTreeMap<AlertDefinitionKey, DispatcherHandle>,
    known: BTreeSet<AlertDefinitionKey>,
}

impl DefinitionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the interval of every running dispatcher.
    pub(crate) fn running(&self) -> BTreeMap<AlertDefinitionKey, i64> {
        self.handles
            .iter()
            .map(|(key, handle)| (key.clone(), handle.interval_seconds()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Records the definitions seen in the store and returns the keys that
    /// were seen before but are gone now.
    pub(crate) fn observe(&mut self, definitions: &[AlertDefinition]) -> Vec<AlertDefinitionKey> {
        let now: BTreeSet<AlertDefinitionKey> = definitions.iter().map(AlertDefinition::key).collect();
        let gone = self.known.difference(&now).cloned().collect();
        self.known = now;
        gone
    }

    /// Drops handles whose task exited without being stopped.
    pub(crate) fn reap_finished(&mut self) -> Vec<AlertDefinitionKey> {
        let finished: Vec<AlertDefinitionKey> = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &finished {
            self.handles.remove(key);
            warn!(definition = %key, "dispatcher exited unexpectedly, will restart");
        }
        finished
    }

    pub(crate) fn start(&mut self, definition: AlertDefinition, base_interval_secs: u64, ctx: &Arc<DispatchContext>) {
        let key = definition.key();
        let handle = DispatcherHandle::spawn(definition, base_interval_secs, Arc::clone(ctx));
        self.handles.insert(key, handle);
    }

    pub(crate) fn take(&mut self, key: &AlertDefinitionKey) -> Option<DispatcherHandle> {
        self.handles.remove(key)
    }

    pub(crate) fn refresh(&mut self, definition: AlertDefinition) {
        if let Some(handle) = self.handles.get_mut(&definition.key()) {
            handle.refresh(definition);
        }
    }

    /// Offers `tick` to every running dispatcher.
    pub(crate) fn broadcast(&self, tick: DateTime<Utc>) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        for handle in self.handles.values() {
            match handle.offer(tick) {
                Offer::Sent => stats.sent += 1,
                Offer::NotDue => stats.not_due += 1,
                Offer::Dropped => stats.dropped += 1,
                Offer::Closed => stats.closed += 1,
            }
        }
        debug!(
            %tick,
            sent = stats.sent,
            not_due = stats.not_due,
            dropped = stats.dropped,
            closed = stats.closed,
            "tick broadcast"
        );
        stats
    }

    /// Removes and returns every handle.
    pub(crate) fn drain(&mut self) -> Vec<DispatcherHandle> {
        std::mem::take(&mut self.handles).into_values().collect()
    }
}
