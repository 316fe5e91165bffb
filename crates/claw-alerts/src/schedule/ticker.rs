//! The top-level scheduling loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::DispatchContext;
use super::observer::SchedulerObserver;
use super::registry::{plan, DefinitionRegistry, ReconcileAction};
use crate::channels::{LogNotifier, TransitionNotifier};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{AlertError, Result};
use crate::eval::EvaluationEngine;
use crate::state::StateTracker;
use crate::store::{AlertStore, OrgScope};

/// Periodically evaluates every schedulable alert definition in the store.
///
/// On every base tick the scheduler re-reads the definitions, starts and
/// stops per-definition dispatchers to match, and offers the tick to every
/// running dispatcher.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    scope: OrgScope,
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlertStore>,
    engine: Arc<dyn EvaluationEngine>,
    notifier: Arc<dyn TransitionNotifier>,
    observer: SchedulerObserver,
}

impl Scheduler {
    /// Starts building a scheduler over `store` and `engine`.
    pub fn builder(store: Arc<dyn AlertStore>, engine: Arc<dyn EvaluationEngine>) -> SchedulerBuilder {
        SchedulerBuilder::new(store, engine)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Creates a state tracker configured for this scheduler.
    #[must_use]
    pub fn new_tracker(&self) -> StateTracker {
        StateTracker::from_config(&self.config)
    }

    /// Loads the persisted instance rows into `tracker`.
    ///
    /// Call once before [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the tracker was
    /// already warmed.
    pub fn warm_state_cache(&self, tracker: &StateTracker) -> Result<usize> {
        let rows = self.store.list_instances(&self.scope)?;
        tracker.warm_from_store(&rows)
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Every dispatcher is stopped before this returns, so no evaluation
    /// outlives the call.
    ///
    /// # Errors
    ///
    /// Always returns `AlertError::Cancelled` once shut down.
    pub async fn run(&self, tracker: Arc<StateTracker>, shutdown: CancellationToken) -> Result<()> {
        let ctx = Arc::new(DispatchContext {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            tracker,
            notifier: Arc::clone(&self.notifier),
            observer: self.observer.clone(),
        });
        let mut registry = DefinitionRegistry::new();
        let mut ticker = self.clock.ticker(self.config.base_interval());

        info!(
            base_interval_secs = self.config.base_interval_secs,
            scope = %self.scope,
            "alert scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                tick = ticker.tick() => {
                    self.reconcile(&mut registry, &ctx, tick).await;
                    registry.broadcast(tick);
                }
            }
        }

        let handles = registry.drain();
        info!(dispatchers = handles.len(), "stopping alert scheduler");
        let timeout = self.config.stop_timeout();
        join_all(handles.into_iter().map(|handle| handle.stop(timeout))).await;

        info!("alert scheduler stopped");
        Err(AlertError::Cancelled)
    }

    async fn reconcile(&self, registry: &mut DefinitionRegistry, ctx: &Arc<DispatchContext>, tick: DateTime<Utc>) {
        registry.reap_finished();

        let definitions = match self.store.list_definitions(&self.scope) {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!(%tick, error = %e, "failed to list alert definitions, skipping reconciliation");
                return;
            }
        };

        let actions = plan(&registry.running(), &definitions);
        let vanished = registry.observe(&definitions);

        let mut stopping = Vec::new();
        let mut starting = Vec::new();
        for action in actions {
            match action {
                ReconcileAction::Start(def) => starting.push(def),
                ReconcileAction::Restart(def) => {
                    debug!(definition = %def.key(), interval_seconds = def.interval_seconds, "interval changed");
                    stopping.extend(registry.take(&def.key()));
                    starting.push(def);
                }
                ReconcileAction::Stop { key, reason } => {
                    debug!(definition = %key, %reason, "stopping dispatcher");
                    stopping.extend(registry.take(&key));
                }
                ReconcileAction::Keep(def) => registry.refresh(def),
            }
        }

        // Old handles must be gone before their replacements write the same keys.
        let timeout = self.config.stop_timeout();
        join_all(stopping.into_iter().map(|handle| handle.stop(timeout))).await;

        for key in &vanished {
            ctx.tracker.remove_definition(key);
        }
        for def in starting {
            registry.start(def, self.config.base_interval_secs, ctx);
        }

        debug!(%tick, definitions = definitions.len(), running = registry.len(), "reconciled");
    }
}

/// Builder for [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlertStore>,
    engine: Arc<dyn EvaluationEngine>,
    notifier: Arc<dyn TransitionNotifier>,
    observer: SchedulerObserver,
}

impl SchedulerBuilder {
    /// Creates a builder with the default configuration, the system clock,
    /// a log notifier and no observer hooks.
    pub fn new(store: Arc<dyn AlertStore>, engine: Arc<dyn EvaluationEngine>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            store,
            engine,
            notifier: Arc::new(LogNotifier::default()),
            observer: SchedulerObserver::default(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the transition notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn TransitionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the observer hooks.
    #[must_use]
    pub fn observer(mut self, observer: SchedulerObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Builds the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the configuration is invalid.
    pub fn build(self) -> Result<Scheduler> {
        self.config.validate()?;
        Ok(Scheduler {
            scope: self.config.org_scope(),
            config: self.config,
            clock: self.clock,
            store: self.store,
            engine: self.engine,
            notifier: self.notifier,
            observer: self.observer,
        })
    }
}
