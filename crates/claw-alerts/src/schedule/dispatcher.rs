//! Per-definition evaluation loop.
//!
//! Each running definition owns one dispatcher task. A base tick is numbered
//! by its timestamp divided by the base interval, and a definition is due on
//! every tick number that is a multiple of its interval in base ticks. The
//! count is global, so a dispatcher started or restarted mid-run keeps the
//! same phase as every other definition of that interval. The handle only
//! forwards due ticks, so an idle dispatcher is parked on its channel.
//!
//! The tick channel holds a single pending tick: a due tick that finds it
//! occupied is dropped, which keeps applied tick timestamps strictly
//! increasing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::observer::SchedulerObserver;
use crate::channels::{StateTransition, TransitionNotifier};
use crate::eval::EvaluationEngine;
use crate::state::{AlertState, StateTracker};
use crate::store::{AlertStore, SaveAlertInstanceCommand};
use crate::types::{AlertDefinition, AlertDefinitionKey, EvalResult, Labels};

/// Collaborators shared by every dispatcher of one scheduler run.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    pub(crate) engine: Arc<dyn EvaluationEngine>,
    pub(crate) store: Arc<dyn AlertStore>,
    pub(crate) tracker: Arc<StateTracker>,
    pub(crate) notifier: Arc<dyn TransitionNotifier>,
    pub(crate) observer: SchedulerObserver,
}

/// A due tick together with the definition as last read from the store.
#[derive(Debug, Clone)]
pub(crate) struct EvalTick {
    pub(crate) tick: DateTime<Utc>,
    pub(crate) definition: Arc<AlertDefinition>,
}

/// What happened to a tick offered to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Not a multiple of the handle's interval.
    NotDue,
    /// Queued for evaluation.
    Sent,
    /// A previous tick is still pending.
    Dropped,
    /// The dispatcher is gone.
    Closed,
}

/// Returns the number of base ticks between evaluations.
pub(crate) fn ticks_per_evaluation(interval_seconds: i64, base_interval_secs: u64) -> u64 {
    let interval = u64::try_from(interval_seconds).unwrap_or(0);
    (interval / base_interval_secs.max(1)).max(1)
}

/// Returns the global number of the base tick at `tick`.
pub(crate) fn tick_number(tick: DateTime<Utc>, base_interval_secs: u64) -> i64 {
    let base = i64::try_from(base_interval_secs.max(1)).unwrap_or(i64::MAX);
    tick.timestamp().div_euclid(base)
}

/// Returns true if base tick `tick_number` is due for a definition
/// evaluated every `every` base ticks.
pub(crate) fn is_due(tick_number: i64, every: u64) -> bool {
    match i64::try_from(every) {
        Ok(every) if every > 0 => tick_number.rem_euclid(every) == 0,
        _ => false,
    }
}

/// Control handle of a running dispatcher.
#[derive(Debug)]
pub(crate) struct DispatcherHandle {
    key: AlertDefinitionKey,
    interval_seconds: i64,
    every: u64,
    base_interval_secs: u64,
    definition: Arc<AlertDefinition>,
    tx: mpsc::Sender<EvalTick>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Spawns the dispatcher task for `definition`.
    pub(crate) fn spawn(definition: AlertDefinition, base_interval_secs: u64, ctx: Arc<DispatchContext>) -> Self {
        let key = definition.key();
        let interval_seconds = definition.interval_seconds;
        let every = ticks_per_evaluation(interval_seconds, base_interval_secs);
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(key.clone(), ctx, rx, cancel.clone()));
        info!(definition = %key, interval_seconds, every, "dispatcher started");

        Self {
            key,
            interval_seconds,
            every,
            base_interval_secs,
            definition: Arc::new(definition),
            tx,
            cancel,
            task,
        }
    }

    pub(crate) const fn interval_seconds(&self) -> i64 {
        self.interval_seconds
    }

    /// Replaces the definition forwarded with future ticks.
    pub(crate) fn refresh(&mut self, definition: AlertDefinition) {
        if *self.definition != definition {
            self.definition = Arc::new(definition);
        }
    }

    /// Returns true if the task has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Forwards `tick` if it is due for this definition.
    pub(crate) fn offer(&self, tick: DateTime<Utc>) -> Offer {
        if !is_due(tick_number(tick, self.base_interval_secs), self.every) {
            return Offer::NotDue;
        }

        let msg = EvalTick {
            tick,
            definition: Arc::clone(&self.definition),
        };
        match self.tx.try_send(msg) {
            Ok(()) => Offer::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(definition = %self.key, %tick, "evaluation still pending, dropping tick");
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Signals stop and waits for acknowledgment.
    ///
    /// Returns false if the dispatcher did not acknowledge within `timeout`
    /// and was aborted.
    pub(crate) async fn stop(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let mut task = self.task;

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {
                debug!(definition = %self.key, "dispatcher stop acknowledged");
                true
            }
            Ok(Err(e)) => {
                warn!(definition = %self.key, error = %e, "dispatcher task failed");
                true
            }
            Err(_) => {
                error!(
                    definition = %self.key,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "dispatcher did not acknowledge stop, abandoning"
                );
                task.abort();
                false
            }
        }
    }
}

async fn run(
    key: AlertDefinitionKey,
    ctx: Arc<DispatchContext>,
    mut rx: mpsc::Receiver<EvalTick>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => evaluate(&key, &ctx, &msg).await,
                None => break,
            },
        }
    }

    ctx.observer.stop_applied(&key);
    info!(definition = %key, "dispatcher stopped");
}

async fn evaluate(key: &AlertDefinitionKey, ctx: &DispatchContext, msg: &EvalTick) {
    let tick = msg.tick;
    let results = match ctx.engine.evaluate(&msg.definition, tick).await {
        Ok(results) => results,
        Err(e) => {
            warn!(definition = %key, %tick, error = %e, "evaluation failed");
            vec![EvalResult::error(Labels::new(), e.to_string())]
        }
    };

    let mut seen = HashSet::with_capacity(results.len());
    for result in &results {
        if let Some(message) = &result.error {
            debug!(definition = %key, error = %message, "error verdict");
        }

        let update = ctx.tracker.set(key, result, tick);
        if let Some(transition) = &update.transition {
            deliver(ctx, &update.state, transition).await;
        }
        seen.insert(update.state.cache_id);
    }

    for update in ctx.tracker.resolve_stale(key, &seen, tick) {
        if let Some(transition) = &update.transition {
            deliver(ctx, &update.state, transition).await;
        }
    }

    debug!(definition = %key, %tick, verdicts = results.len(), "evaluation applied");
    ctx.observer.eval_applied(key, tick);
}

/// Persists the row and notifies the transition.
///
/// Store writes may hit the disk, so they run on the blocking pool.
async fn deliver(ctx: &DispatchContext, state: &AlertState, transition: &StateTransition) {
    let store = Arc::clone(&ctx.store);
    let cmd = SaveAlertInstanceCommand::from(state);
    match tokio::task::spawn_blocking(move || store.save_instance(cmd)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(cache_id = %state.cache_id, error = %e, "failed to persist alert instance"),
        Err(e) => warn!(cache_id = %state.cache_id, error = %e, "instance write task failed"),
    }
    if let Err(e) = ctx.notifier.notify(transition) {
        warn!(cache_id = %state.cache_id, notifier = %ctx.notifier.name(), error = %e, "failed to notify state transition");
    }
}
