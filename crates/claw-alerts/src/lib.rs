//! Alert evaluation scheduler for Clawbernetes.
//!
//! `claw-alerts` periodically re-evaluates a dynamic set of alert definitions,
//! tracks the resulting per-instance state, and hands state transitions to a
//! notification layer.
//!
//! # Features
//!
//! - **Tick-driven scheduling**: every definition runs on a multiple of one base interval
//! - **Live reconciliation**: definitions can appear, disappear, change interval, or be
//!   paused while the scheduler runs
//! - **Instance state tracking**: per (definition, label set) state with history,
//!   `starts_at`/`ends_at`, and stale auto-resolve
//! - **Warm restarts**: state is rebuilt from persisted instance rows at startup
//! - **Deterministic testing**: a mock clock drives multi-tick behavior without waiting
//!
//! # Example
//!
//! ```rust
//! use claw_alerts::{
//!     AlertCondition, ComparisonOperator, DefinitionCommands, MemoryStore,
//!     SaveAlertDefinitionCommand, UpdateAlertDefinitionPausedCommand,
//! };
//!
//! let store = MemoryStore::new();
//!
//! // cpu_usage > 80, evaluated every 30 seconds
//! let condition = AlertCondition::new("cpu_usage", ComparisonOperator::GreaterThan, 80.0).unwrap();
//! let definition = store
//!     .save_definition(SaveAlertDefinitionCommand::new(1, "High CPU", condition, 30))
//!     .unwrap();
//! assert_eq!(definition.version, 1);
//!
//! // Pausing is observed by a running scheduler on its next tick
//! store
//!     .set_paused(UpdateAlertDefinitionPausedCommand::new(1, [definition.uid.clone()], true))
//!     .unwrap();
//! ```
//!
//! # Running the scheduler
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use claw_alerts::{ConditionEngine, MemoryStore, Scheduler, SchedulerConfig, StaticMetricSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> claw_alerts::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let engine = Arc::new(ConditionEngine::new(Arc::new(StaticMetricSource::new())));
//!
//! let scheduler = Scheduler::builder(store, engine)
//!     .config(SchedulerConfig::default())
//!     .build()?;
//!
//! let tracker = Arc::new(scheduler.new_tracker());
//! scheduler.warm_state_cache(&tracker)?;
//!
//! let shutdown = CancellationToken::new();
//! scheduler.run(tracker, shutdown).await
//! # }
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/claw-alerts/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod eval;
pub mod schedule;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use channels::{ChannelNotifier, FanoutNotifier, LogNotifier, StateTransition, TransitionNotifier};
pub use clock::{Clock, MockClock, SystemClock, TickSource};
pub use config::SchedulerConfig;
pub use error::{AlertError, Result};
pub use eval::{ConditionEngine, EvalFuture, EvaluationEngine, MetricSource, Sample, StaticMetricSource};
pub use schedule::{
    EvalAppliedFn, ReconcileAction, Scheduler, SchedulerBuilder, SchedulerObserver, StopAppliedFn, StopReason,
};
pub use state::{AlertState, StateEvaluation, StateTracker, StateUpdate};
pub use store::{
    AlertStore, DefinitionCommands, DeleteAlertDefinitionCommand, JsonFileStore, MemoryStore, OrgScope,
    SaveAlertDefinitionCommand, SaveAlertInstanceCommand, UpdateAlertDefinitionCommand,
    UpdateAlertDefinitionPausedCommand,
};
pub use types::{
    cache_id, AlertCondition, AlertDefinition, AlertDefinitionKey, AlertInstance, ComparisonOperator, EvalResult,
    EvalState, InstanceState, Labels,
};
