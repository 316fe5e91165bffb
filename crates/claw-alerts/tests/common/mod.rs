//! Shared harness for scheduler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use claw_alerts::{
    AlertCondition, AlertDefinition, ChannelNotifier, ComparisonOperator, ConditionEngine, DefinitionCommands,
    EvaluationEngine, MemoryStore, MockClock, Result, SaveAlertDefinitionCommand, Scheduler, SchedulerConfig,
    SchedulerObserver, StateTracker, StateTransition, StaticMetricSource,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Base tick period used by every harness.
pub const BASE: Duration = Duration::from_secs(1);

/// How long to wait before concluding nothing else will happen.
const QUIET: Duration = Duration::from_millis(100);

/// An observer callback, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Event {
    /// An evaluation fold completed.
    Eval(String, DateTime<Utc>),
    /// A dispatcher acknowledged a stop.
    Stop(String),
}

/// Returns the tick timestamp `n` base periods after the epoch.
pub fn at(n: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(n)
}

pub fn eval(uid: &str, n: i64) -> Event {
    Event::Eval(uid.to_string(), at(n))
}

pub fn stop(uid: &str) -> Event {
    Event::Stop(uid.to_string())
}

pub fn cpu_above(threshold: f64) -> AlertCondition {
    AlertCondition::new("cpu_usage", ComparisonOperator::GreaterThan, threshold).unwrap()
}

/// Saves a definition with a fixed UID in org 1.
pub fn save(store: &MemoryStore, uid: &str, interval_seconds: i64) -> AlertDefinition {
    store
        .save_definition(SaveAlertDefinitionCommand::new(1, uid, cpu_above(80.0), interval_seconds).with_uid(uid))
        .unwrap()
}

/// A scheduler running on a mock clock in a background task.
pub struct Harness {
    pub clock: MockClock,
    pub store: Arc<MemoryStore>,
    pub source: Arc<StaticMetricSource>,
    pub tracker: Arc<StateTracker>,
    pub transitions: mpsc::Receiver<StateTransition>,
    events: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    /// Starts a scheduler over `store`, evaluating with a condition engine.
    pub async fn start(store: Arc<MemoryStore>) -> Self {
        let source = Arc::new(StaticMetricSource::new());
        let engine = Arc::new(ConditionEngine::new(source.clone()));
        Self::start_with(store, source, engine, StateTracker::new()).await
    }

    /// Starts a scheduler with a custom engine and a pre-built tracker.
    pub async fn start_with(
        store: Arc<MemoryStore>,
        source: Arc<StaticMetricSource>,
        engine: Arc<dyn EvaluationEngine>,
        tracker: StateTracker,
    ) -> Self {
        let clock = MockClock::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (notifier, transitions) = ChannelNotifier::new("test", 256);

        let observer = {
            let on_eval = events_tx.clone();
            SchedulerObserver::new()
                .on_eval_applied(move |key, tick| {
                    let _ = on_eval.send(Event::Eval(key.uid.clone(), tick));
                })
                .on_stop_applied(move |key| {
                    let _ = events_tx.send(Event::Stop(key.uid.clone()));
                })
        };

        let config = SchedulerConfig {
            base_interval_secs: BASE.as_secs(),
            stop_timeout_ms: 1_000,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::builder(store.clone(), engine)
            .config(config)
            .clock(Arc::new(clock.clone()))
            .notifier(Arc::new(notifier))
            .observer(observer)
            .build()
            .unwrap();

        let tracker = Arc::new(tracker);
        let shutdown = CancellationToken::new();
        let task = {
            let tracker = Arc::clone(&tracker);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(tracker, shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(5), clock.wait_for_tickers(1))
            .await
            .unwrap();

        Self {
            clock,
            store,
            source,
            tracker,
            transitions,
            events,
            shutdown,
            task,
        }
    }

    /// Fires the next base tick and returns its timestamp.
    pub fn tick(&self) -> DateTime<Utc> {
        self.clock.advance(BASE)
    }

    /// Fires one tick and asserts exactly `expected` happens, in any order.
    pub async fn tick_expect(&mut self, expected: Vec<Event>) -> DateTime<Utc> {
        let tick = self.tick();
        self.expect(expected).await;
        tick
    }

    /// Waits for exactly `expected`, in any order, then for silence.
    pub async fn expect(&mut self, mut expected: Vec<Event>) {
        let mut got = Vec::with_capacity(expected.len());
        while got.len() < expected.len() {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}, got {got:?}"))
                .unwrap();
            got.push(event);
        }

        tokio::time::sleep(QUIET).await;
        while let Ok(event) = self.events.try_recv() {
            got.push(event);
        }

        got.sort();
        expected.sort();
        assert_eq!(got, expected);
    }

    /// Waits for silence and returns whatever was emitted meanwhile.
    pub async fn settle(&mut self) -> Vec<Event> {
        tokio::time::sleep(QUIET).await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Cancels the scheduler, asserts it returns `Cancelled`, and returns the
    /// events emitted while shutting down.
    pub async fn shutdown(mut self) -> Vec<Event> {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(claw_alerts::AlertError::Cancelled)));

        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events.sort();
        events
    }
}
