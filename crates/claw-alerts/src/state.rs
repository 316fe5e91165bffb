//! Alert instance state tracking.
//!
//! The [`StateTracker`] maps an organization and CacheId (definition UID plus
//! sorted label set) to the current [`AlertState`] of that instance. Each row sits behind its
//! own lock, so dispatchers of different definitions never contend on a row,
//! and the map-level lock is only taken for writing when a row is created or
//! removed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channels::StateTransition;
use crate::config::SchedulerConfig;
use crate::error::{AlertError, Result};
use crate::types::{cache_id, AlertDefinitionKey, AlertInstance, EvalResult, EvalState, Labels};

/// One entry of an instance's evaluation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvaluation {
    /// The tick the evaluation ran for.
    pub evaluation_time: DateTime<Utc>,
    /// The resulting state.
    pub evaluation_state: EvalState,
}

/// The tracked state of one (definition, label set) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    /// Owning definition UID.
    pub uid: String,
    /// Owning organization.
    pub org_id: i64,
    /// Tracker key.
    pub cache_id: String,
    /// Instance labels.
    pub labels: Labels,
    /// Current state.
    pub state: EvalState,
    /// Evaluation history, oldest first.
    pub results: Vec<StateEvaluation>,
    /// When the current non-normal episode began.
    pub starts_at: DateTime<Utc>,
    /// When the instance auto-resolves without further evaluations.
    pub ends_at: DateTime<Utc>,
    /// Time of the last evaluation.
    pub last_evaluation_time: DateTime<Utc>,
}

impl AlertState {
    fn new(key: &AlertDefinitionKey, labels: Labels, state: EvalState, tick: DateTime<Utc>) -> Self {
        Self {
            uid: key.uid.clone(),
            org_id: key.org_id,
            cache_id: cache_id(&key.uid, &labels),
            labels,
            state,
            results: vec![StateEvaluation {
                evaluation_time: tick,
                evaluation_state: state,
            }],
            starts_at: tick,
            ends_at: tick,
            last_evaluation_time: tick,
        }
    }

    /// Rebuilds a state row from a persisted instance.
    #[must_use]
    pub fn from_instance(instance: &AlertInstance) -> Self {
        let state = EvalState::from(instance.current_state);
        Self {
            uid: instance.definition_uid.clone(),
            org_id: instance.definition_org_id,
            cache_id: instance.cache_id(),
            labels: instance.labels.clone(),
            state,
            results: vec![StateEvaluation {
                evaluation_time: instance.last_eval_time,
                evaluation_state: state,
            }],
            starts_at: instance.current_state_since,
            ends_at: instance.current_state_end,
            last_evaluation_time: instance.last_eval_time,
        }
    }

    /// Returns the key of the owning definition.
    #[must_use]
    pub fn definition_key(&self) -> AlertDefinitionKey {
        AlertDefinitionKey::new(self.org_id, self.uid.clone())
    }

    /// True once the last evaluation is older than `resolve_window` at `tick`.
    fn expired(&self, resolve_window: TimeDelta, tick: DateTime<Utc>) -> bool {
        self.last_evaluation_time
            .checked_add_signed(resolve_window)
            .is_some_and(|deadline| deadline < tick)
    }

    /// Folds one evaluation into the row and returns the previous state.
    fn apply(
        &mut self,
        state: EvalState,
        tick: DateTime<Utc>,
        resolve_window: TimeDelta,
        max_history: usize,
    ) -> EvalState {
        let previous = self.state;

        self.results.push(StateEvaluation {
            evaluation_time: tick,
            evaluation_state: state,
        });
        if max_history > 0 && self.results.len() > max_history {
            let excess = self.results.len() - max_history;
            self.results.drain(..excess);
        }

        if previous.is_normal() && !state.is_normal() {
            self.starts_at = tick;
        }
        self.state = state;
        self.last_evaluation_time = tick;
        self.ends_at = tick.checked_add_signed(resolve_window).unwrap_or(DateTime::<Utc>::MAX_UTC);

        previous
    }

    fn transition_from(&self, previous: EvalState, tick: DateTime<Utc>) -> Option<StateTransition> {
        (previous != self.state).then(|| StateTransition {
            cache_id: self.cache_id.clone(),
            definition: self.definition_key(),
            labels: self.labels.clone(),
            previous,
            current: self.state,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            tick,
        })
    }
}

/// The outcome of folding one verdict into the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    /// Snapshot of the row after the update.
    pub state: AlertState,
    /// Present when the categorical state changed.
    pub transition: Option<StateTransition>,
}

type Row = Arc<Mutex<AlertState>>;

/// Identity of a tracked instance: organization plus CacheId.
type InstanceKey = (i64, String);

#[derive(Debug, Default)]
struct Rows {
    by_id: HashMap<InstanceKey, Row>,
    by_definition: HashMap<AlertDefinitionKey, HashSet<String>>,
}

impl Rows {
    fn insert(&mut self, key: AlertDefinitionKey, state: AlertState) {
        let id = state.cache_id.clone();
        self.by_id.insert((key.org_id, id.clone()), Arc::new(Mutex::new(state)));
        self.by_definition.entry(key).or_default().insert(id);
    }

    fn definition_rows<'a>(&'a self, key: &'a AlertDefinitionKey) -> impl Iterator<Item = (&'a String, &'a Row)> + 'a {
        self.by_definition
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(move |id| {
                self.by_id
                    .get(&(key.org_id, id.clone()))
                    .map(|row| (id, row))
            })
    }
}

/// Concurrent cache of alert instance states keyed by organization and
/// CacheId.
///
/// Rows are also indexed by owning definition, so per-definition work only
/// touches that definition's instances.
#[derive(Debug)]
pub struct StateTracker {
    resolve_window: TimeDelta,
    max_history: usize,
    rows: RwLock<Rows>,
    warmed: AtomicBool,
}

impl StateTracker {
    /// Default resolve window.
    pub const DEFAULT_RESOLVE_WINDOW: Duration = Duration::from_secs(60);

    /// Default bound on per-instance history.
    pub const DEFAULT_MAX_HISTORY: usize = 100;

    /// Creates a tracker with the default resolve window and history bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(Self::DEFAULT_RESOLVE_WINDOW, Self::DEFAULT_MAX_HISTORY)
    }

    /// Creates a tracker with the given resolve window and history bound.
    ///
    /// A `max_history` of zero keeps the full history.
    #[must_use]
    pub fn with_options(resolve_window: Duration, max_history: usize) -> Self {
        Self {
            resolve_window: TimeDelta::from_std(resolve_window).unwrap_or(TimeDelta::MAX),
            max_history,
            rows: RwLock::new(Rows::default()),
            warmed: AtomicBool::new(false),
        }
    }

    /// Creates a tracker configured from the scheduler configuration.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::with_options(config.resolve_window(), config.max_history)
    }

    /// Returns a snapshot of the row for `cache_id` in organization `org_id`.
    #[must_use]
    pub fn get(&self, org_id: i64, cache_id: &str) -> Option<AlertState> {
        let row = self.rows.read().by_id.get(&(org_id, cache_id.to_string())).cloned()?;
        let state = row.lock().clone();
        Some(state)
    }

    /// Folds one verdict for `key` at `tick` into the tracker.
    ///
    /// A previously unseen instance is created with `starts_at == ends_at ==
    /// tick` and is treated as previously normal when deciding whether the
    /// update is a transition.
    pub fn set(&self, key: &AlertDefinitionKey, result: &EvalResult, tick: DateTime<Utc>) -> StateUpdate {
        let id = (key.org_id, cache_id(&key.uid, &result.labels));

        let existing = self.rows.read().by_id.get(&id).cloned();
        let row = match existing {
            Some(row) => row,
            None => {
                let mut rows = self.rows.write();
                if let Some(row) = rows.by_id.get(&id) {
                    Arc::clone(row)
                } else {
                    let state = AlertState::new(key, result.labels.clone(), result.state, tick);
                    let transition = state.transition_from(EvalState::Normal, tick);
                    rows.insert(key.clone(), state.clone());

                    debug!(org_id = key.org_id, cache_id = %state.cache_id, state = %state.state, "new alert instance");
                    return StateUpdate { state, transition };
                }
            }
        };

        let mut state = row.lock();
        let previous = state.apply(result.state, tick, self.resolve_window, self.max_history);
        let transition = state.transition_from(previous, tick);
        StateUpdate {
            state: state.clone(),
            transition,
        }
    }

    /// Resolves instances of `key` that were not part of the latest evaluation
    /// and whose last evaluation is older than the resolve window.
    pub fn resolve_stale(
        &self,
        key: &AlertDefinitionKey,
        seen: &HashSet<String>,
        tick: DateTime<Utc>,
    ) -> Vec<StateUpdate> {
        let candidates: Vec<Row> = self
            .rows
            .read()
            .definition_rows(key)
            .filter(|(id, _)| !seen.contains(*id))
            .map(|(_, row)| Arc::clone(row))
            .collect();

        let mut updates = Vec::new();
        for row in candidates {
            let mut state = row.lock();
            if state.state.is_normal() || !state.expired(self.resolve_window, tick) {
                continue;
            }

            let previous = state.apply(EvalState::Normal, tick, self.resolve_window, self.max_history);
            debug!(cache_id = %state.cache_id, previous = %previous, "resolved stale alert instance");
            let transition = state.transition_from(previous, tick);
            updates.push(StateUpdate {
                state: state.clone(),
                transition,
            });
        }
        updates
    }

    /// Removes the row for `cache_id` in organization `org_id`.
    pub fn remove(&self, org_id: i64, cache_id: &str) -> Option<AlertState> {
        let mut rows = self.rows.write();
        let row = rows.by_id.remove(&(org_id, cache_id.to_string()))?;
        let state = row.lock().clone();

        let key = state.definition_key();
        if let Some(ids) = rows.by_definition.get_mut(&key) {
            ids.remove(cache_id);
            if ids.is_empty() {
                rows.by_definition.remove(&key);
            }
        }
        Some(state)
    }

    /// Removes every row of the definition `key` and returns how many were dropped.
    pub fn remove_definition(&self, key: &AlertDefinitionKey) -> usize {
        let mut rows = self.rows.write();
        let Some(ids) = rows.by_definition.remove(key) else {
            return 0;
        };
        for id in &ids {
            rows.by_id.remove(&(key.org_id, id.clone()));
        }

        debug!(definition = %key, removed = ids.len(), "dropped alert instances");
        ids.len()
    }

    /// Bulk-loads persisted instance rows.
    ///
    /// Must run once, before any dispatcher starts.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlreadyWarmed` on a second call.
    pub fn warm_from_store(&self, instances: &[AlertInstance]) -> Result<usize> {
        if self.warmed.swap(true, Ordering::SeqCst) {
            return Err(AlertError::AlreadyWarmed);
        }

        let mut rows = self.rows.write();
        for instance in instances {
            rows.insert(instance.definition_key(), AlertState::from_instance(instance));
        }

        info!(instances = instances.len(), "warmed state cache");
        Ok(instances.len())
    }

    /// Returns true once [`warm_from_store`](Self::warm_from_store) has run.
    #[must_use]
    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::SeqCst)
    }

    /// Returns snapshots of all rows.
    #[must_use]
    pub fn list(&self) -> Vec<AlertState> {
        let rows: Vec<Row> = self.rows.read().by_id.values().cloned().collect();
        rows.iter().map(|row| row.lock().clone()).collect()
    }

    /// Returns snapshots of every row of the definition `key`.
    #[must_use]
    pub fn states_for(&self, key: &AlertDefinitionKey) -> Vec<AlertState> {
        let rows: Vec<Row> = self
            .rows
            .read()
            .definition_rows(key)
            .map(|(_, row)| Arc::clone(row))
            .collect();
        rows.iter().map(|row| row.lock().clone()).collect()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().by_id.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().by_id.is_empty()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
