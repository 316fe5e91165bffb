//! Integration tests for the tick-driven scheduler.
//!
//! Every test drives the scheduler with a mock clock at a one second base
//! interval and observes it through the evaluation and stop hooks.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use claw_alerts::{
    AlertDefinition, AlertDefinitionKey, AlertError, DefinitionCommands, DeleteAlertDefinitionCommand, EvalFuture,
    EvalState, EvaluationEngine, InstanceState, Labels, MemoryStore, OrgScope, Sample, SaveAlertDefinitionCommand,
    StateTracker, StaticMetricSource, UpdateAlertDefinitionCommand, UpdateAlertDefinitionPausedCommand,
};
use claw_alerts::AlertStore;
use common::{at, cpu_above, eval, save, stop, Harness};
use parking_lot::Mutex;

// ==================== Helper Engines ====================

/// Records the tick every evaluation was asked to run for.
#[derive(Debug, Default)]
struct RecordingEngine {
    calls: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl EvaluationEngine for RecordingEngine {
    fn evaluate<'a>(&'a self, definition: &'a AlertDefinition, tick: DateTime<Utc>) -> EvalFuture<'a> {
        Box::pin(async move {
            self.calls.lock().push((definition.uid.clone(), tick));
            Ok(Vec::new())
        })
    }
}

/// Panics on its first evaluation, then behaves.
#[derive(Debug, Default)]
struct CrashOnceEngine {
    calls: AtomicUsize,
}

impl EvaluationEngine for CrashOnceEngine {
    fn evaluate<'a>(&'a self, _definition: &'a AlertDefinition, _tick: DateTime<Utc>) -> EvalFuture<'a> {
        Box::pin(async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("engine crashed");
            }
            Ok(Vec::new())
        })
    }
}

fn host(name: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert("host".to_string(), name.to_string());
    labels
}

// ==================== Scheduling Scenario ====================

#[tokio::test]
async fn test_interval_change_delete_and_pause_scenario() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "slow", 0);
    save(&store, "fast", 1);
    let mut h = Harness::start(store).await;

    // Only the interval-1 definition fires on the first tick.
    h.tick_expect(vec![eval("fast", 1)]).await;

    h.store
        .update_definition(UpdateAlertDefinitionCommand::new(1, "slow").interval_seconds(3))
        .unwrap();

    // Due on the global tick count: 3, 6 and 9.
    h.tick_expect(vec![eval("fast", 2)]).await;
    h.tick_expect(vec![eval("fast", 3), eval("slow", 3)]).await;
    h.tick_expect(vec![eval("fast", 4)]).await;

    // Deleting the fast definition stops it once and never evaluates it again.
    h.store
        .delete_definition(DeleteAlertDefinitionCommand::new(1, "fast"))
        .unwrap();
    h.tick_expect(vec![stop("fast")]).await;
    h.tick_expect(vec![eval("slow", 6)]).await;

    save(&h.store, "late", 1);
    h.tick_expect(vec![eval("late", 7)]).await;

    h.store
        .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["late"], true))
        .unwrap();
    h.tick_expect(vec![stop("late")]).await;

    h.store
        .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["late"], false))
        .unwrap();
    h.tick_expect(vec![eval("slow", 9), eval("late", 9)]).await;

    assert_eq!(h.shutdown().await, vec![stop("late"), stop("slow")]);
}

#[tokio::test]
async fn test_zero_interval_never_runs() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "never", 0);
    let mut h = Harness::start(store).await;

    for _ in 0..4 {
        h.tick_expect(vec![]).await;
    }

    assert!(h.shutdown().await.is_empty());
}

#[tokio::test]
async fn test_interval_follows_global_tick_count() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "three", 3);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("three", 3)]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("three", 6)]).await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_definition_added_while_running() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![]).await;
    save(&h.store, "late", 2);

    // Started on tick 2, which is already a multiple of its interval.
    h.tick_expect(vec![eval("late", 2)]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("late", 4)]).await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_interval_change_restarts_dispatcher() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![eval("cpu", 1)]).await;
    h.store
        .update_definition(UpdateAlertDefinitionCommand::new(1, "cpu").interval_seconds(2))
        .unwrap();

    // The old dispatcher stops and its replacement fires on the same even tick.
    h.tick_expect(vec![stop("cpu"), eval("cpu", 2)]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("cpu", 4)]).await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_pause_then_unpause_keeps_global_phase() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 3);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("cpu", 3)]).await;

    h.store
        .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["cpu"], true))
        .unwrap();
    h.tick_expect(vec![stop("cpu")]).await;
    h.tick_expect(vec![]).await;
    // Tick 6 passes while paused and is not caught up later.
    h.tick_expect(vec![]).await;

    h.store
        .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["cpu"], false))
        .unwrap();
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![]).await;
    h.tick_expect(vec![eval("cpu", 9)]).await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_interval_set_to_zero_stops() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![eval("cpu", 1)]).await;
    h.store
        .update_definition(UpdateAlertDefinitionCommand::new(1, "cpu").interval_seconds(0))
        .unwrap();
    h.tick_expect(vec![stop("cpu")]).await;
    h.tick_expect(vec![]).await;

    assert!(h.shutdown().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_every_dispatcher() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "a", 1);
    save(&store, "b", 2);
    save(&store, "c", 5);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![eval("a", 1)]).await;

    assert_eq!(h.shutdown().await, vec![stop("a"), stop("b"), stop("c")]);
}

// ==================== Evaluation Time ====================

#[tokio::test]
async fn test_engine_receives_tick_timestamp() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 2);
    let engine = Arc::new(RecordingEngine::default());
    let mut h = Harness::start_with(
        store,
        Arc::new(StaticMetricSource::new()),
        engine.clone(),
        StateTracker::new(),
    )
    .await;

    for n in 1..=6 {
        let expected = if n % 2 == 0 { vec![eval("cpu", n)] } else { vec![] };
        h.tick_expect(expected).await;
    }

    assert_eq!(
        *engine.calls.lock(),
        vec![
            ("cpu".to_string(), at(2)),
            ("cpu".to_string(), at(4)),
            ("cpu".to_string(), at(6)),
        ]
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_burst_advance_keeps_applied_ticks_increasing() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let engine = Arc::new(RecordingEngine::default());
    let mut h = Harness::start_with(
        store,
        Arc::new(StaticMetricSource::new()),
        engine.clone(),
        StateTracker::new(),
    )
    .await;

    h.tick_expect(vec![eval("cpu", 1)]).await;

    // A large jump fires every skipped tick; ticks that find an evaluation
    // already pending are dropped, never reordered.
    h.clock.advance(Duration::from_secs(3));
    let events = h.settle().await;
    assert!(!events.is_empty());

    let ticks: Vec<_> = engine.calls.lock().iter().map(|(_, t)| *t).collect();
    assert_eq!(ticks[0], at(1));
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
    assert!(ticks.iter().all(|t| *t <= at(4)));

    let applied: Vec<_> = events
        .into_iter()
        .map(|e| match e {
            common::Event::Eval(_, tick) => tick,
            common::Event::Stop(uid) => panic!("unexpected stop of {uid}"),
        })
        .collect();
    assert_eq!(applied, ticks[1..].to_vec());
    h.shutdown().await;
}

// ==================== State And Persistence ====================

#[tokio::test]
async fn test_transitions_are_tracked_persisted_and_notified() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let mut h = Harness::start(store).await;
    h.source.set("cpu_usage", vec![Sample::new(host("a"), 95.0)]);

    h.tick_expect(vec![eval("cpu", 1)]).await;
    h.tick_expect(vec![eval("cpu", 2)]).await;

    let state = h.tracker.get(1, "cpu host=a").unwrap();
    assert_eq!(state.state, EvalState::Alerting);
    assert_eq!(state.starts_at, at(1));
    assert_eq!(state.last_evaluation_time, at(2));
    assert_eq!(state.results.len(), 2);

    // Only the first evaluation changed state.
    let transition = h.transitions.try_recv().unwrap();
    assert_eq!(transition.previous, EvalState::Normal);
    assert_eq!(transition.current, EvalState::Alerting);
    assert_eq!(transition.tick, at(1));
    assert!(h.transitions.try_recv().is_err());

    h.source.set("cpu_usage", vec![Sample::new(host("a"), 10.0)]);
    h.tick_expect(vec![eval("cpu", 3)]).await;
    assert_eq!(h.transitions.try_recv().unwrap().current, EvalState::Normal);

    let rows = h.store.list_instances(&OrgScope::All).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].current_state, InstanceState::Normal);
    assert_eq!(rows[0].last_eval_time, at(3));

    h.shutdown().await;
}

#[tokio::test]
async fn test_no_data_verdict_for_missing_metric() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let mut h = Harness::start(store).await;

    h.tick_expect(vec![eval("cpu", 1)]).await;

    assert_eq!(h.tracker.get(1, "cpu").unwrap().state, EvalState::NoData);
    h.shutdown().await;
}

#[tokio::test]
async fn test_delete_drops_tracker_rows_and_pause_keeps_them() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    save(&store, "mem", 1);
    let mut h = Harness::start(store).await;
    h.source.set("cpu_usage", vec![Sample::new(host("a"), 95.0)]);

    h.tick_expect(vec![eval("cpu", 1), eval("mem", 1)]).await;
    assert_eq!(h.tracker.len(), 2);

    h.store
        .set_paused(UpdateAlertDefinitionPausedCommand::new(1, ["mem"], true))
        .unwrap();
    h.store
        .delete_definition(DeleteAlertDefinitionCommand::new(1, "cpu"))
        .unwrap();
    h.tick_expect(vec![stop("cpu"), stop("mem")]).await;

    assert!(h.tracker.states_for(&AlertDefinitionKey::new(1, "cpu")).is_empty());
    assert_eq!(h.tracker.states_for(&AlertDefinitionKey::new(1, "mem")).len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_same_uid_in_two_orgs_is_tracked_separately() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    store
        .save_definition(SaveAlertDefinitionCommand::new(2, "cpu", cpu_above(99.0), 1).with_uid("cpu"))
        .unwrap();
    let mut h = Harness::start(store).await;
    h.source.set("cpu_usage", vec![Sample::new(host("a"), 95.0)]);

    h.tick_expect(vec![eval("cpu", 1), eval("cpu", 1)]).await;
    assert_eq!(h.tracker.len(), 2);
    assert_eq!(h.tracker.get(1, "cpu host=a").unwrap().state, EvalState::Alerting);
    assert_eq!(h.tracker.get(2, "cpu host=a").unwrap().state, EvalState::Normal);

    // Deleting org 2's definition leaves org 1's row alone.
    h.store
        .delete_definition(DeleteAlertDefinitionCommand::new(2, "cpu"))
        .unwrap();
    h.tick_expect(vec![stop("cpu"), eval("cpu", 2)]).await;

    assert!(h.tracker.get(2, "cpu host=a").is_none());
    let state = h.tracker.get(1, "cpu host=a").unwrap();
    assert_eq!(state.state, EvalState::Alerting);
    assert_eq!(state.results.len(), 2);
    h.shutdown().await;
}

// ==================== Failure Handling ====================

#[tokio::test]
async fn test_crashed_dispatcher_is_restarted() {
    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    let engine = Arc::new(CrashOnceEngine::default());
    let mut h = Harness::start_with(
        store,
        Arc::new(StaticMetricSource::new()),
        engine.clone(),
        StateTracker::new(),
    )
    .await;

    // The first evaluation panics: no fold, no stop acknowledgment.
    h.tick_expect(vec![]).await;
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

    // The next reconciliation notices the dead task and starts a fresh one.
    h.tick_expect(vec![eval("cpu", 2)]).await;
    h.tick_expect(vec![eval("cpu", 3)]).await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_engine_error_is_folded_as_error_state() {
    #[derive(Debug)]
    struct Failing;

    impl EvaluationEngine for Failing {
        fn evaluate<'a>(&'a self, _definition: &'a AlertDefinition, _tick: DateTime<Utc>) -> EvalFuture<'a> {
            Box::pin(async { Err(AlertError::evaluation("datasource unreachable")) })
        }
    }

    let store = Arc::new(MemoryStore::new());
    save(&store, "cpu", 1);
    save(&store, "mem", 1);
    let mut h = Harness::start_with(
        store,
        Arc::new(StaticMetricSource::new()),
        Arc::new(Failing),
        StateTracker::new(),
    )
    .await;

    h.tick_expect(vec![eval("cpu", 1), eval("mem", 1)]).await;

    assert_eq!(h.tracker.get(1, "cpu").unwrap().state, EvalState::Error);
    assert_eq!(h.tracker.get(1, "mem").unwrap().state, EvalState::Error);
    h.shutdown().await;
}
