//! Production wiring of the scheduler.

use std::fmt;
use std::sync::Arc;

use claw_alerts::{
    AlertError, AlertStore, Clock, ConditionEngine, EvalState, JsonFileStore, LogNotifier, Scheduler, StateTracker,
    SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::metrics::FileMetricSource;

/// Counts of the definitions visible to the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Definitions in the configured organizations.
    pub definitions: usize,
    /// Definitions that will be evaluated.
    pub schedulable: usize,
    /// Paused definitions.
    pub paused: usize,
    /// Definitions with a zero interval.
    pub disabled: usize,
    /// Persisted instance rows.
    pub instances: usize,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} definitions ({} schedulable, {} paused, {} disabled), {} instances",
            self.definitions, self.schedulable, self.paused, self.disabled, self.instances
        )
    }
}

/// Instance states held by the tracker when the daemon stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tracked instances.
    pub instances: usize,
    /// Instances in `Alerting`.
    pub alerting: usize,
    /// Instances in `NoData`.
    pub no_data: usize,
    /// Instances in `Error`.
    pub error: usize,
}

impl RunSummary {
    fn from_tracker(tracker: &StateTracker) -> Self {
        tracker.list().iter().fold(Self::default(), |mut summary, state| {
            summary.instances += 1;
            match state.state {
                EvalState::Alerting => summary.alerting += 1,
                EvalState::NoData => summary.no_data += 1,
                EvalState::Error => summary.error += 1,
                EvalState::Normal => {}
            }
            summary
        })
    }
}

/// The alert daemon: a JSON file store, a condition engine over a metrics
/// snapshot, and a scheduler logging every transition.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    store: Arc<JsonFileStore>,
    scheduler: Scheduler,
    tracker: Arc<StateTracker>,
}

impl Daemon {
    /// Wires the daemon on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Wires the daemon on `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn with_clock(config: DaemonConfig, clock: Arc<dyn Clock>) -> Result<Self, DaemonError> {
        config.validate()?;

        let store = Arc::new(JsonFileStore::open(&config.store_path)?);
        let source = Arc::new(FileMetricSource::new(&config.metrics_path));
        let scheduler = Scheduler::builder(store.clone(), Arc::new(ConditionEngine::new(source)))
            .config(config.scheduler.clone())
            .clock(clock)
            .notifier(Arc::new(LogNotifier::default()))
            .build()?;
        let tracker = Arc::new(scheduler.new_tracker());

        Ok(Self {
            config,
            store,
            scheduler,
            tracker,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Returns the state tracker.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    /// Summarizes the definitions and instances the daemon would schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn check(&self) -> Result<CheckReport, DaemonError> {
        let scope = self.config.scheduler.org_scope();
        let definitions = self.store.list_definitions(&scope)?;
        let instances = self.store.list_instances(&scope)?;

        let mut report = CheckReport {
            definitions: definitions.len(),
            instances: instances.len(),
            ..CheckReport::default()
        };
        for definition in &definitions {
            if definition.is_schedulable() {
                report.schedulable += 1;
            } else if definition.paused {
                report.paused += 1;
            } else {
                report.disabled += 1;
            }
        }
        Ok(report)
    }

    /// Warms the state cache and runs the scheduler until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cache cannot be warmed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<RunSummary, DaemonError> {
        let warmed = self.scheduler.warm_state_cache(&self.tracker)?;
        info!(
            instances = warmed,
            store = %self.store.path().display(),
            "restored alert state"
        );

        match self.scheduler.run(Arc::clone(&self.tracker), shutdown).await {
            Ok(()) | Err(AlertError::Cancelled) => {}
            Err(e) => return Err(e.into()),
        }

        let summary = RunSummary::from_tracker(&self.tracker);
        info!(
            instances = summary.instances,
            alerting = summary.alerting,
            no_data = summary.no_data,
            error = summary.error,
            "alert daemon stopped"
        );
        Ok(summary)
    }
}
