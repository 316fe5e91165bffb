//! Pluggable time sources.
//!
//! The scheduler never reads wall-clock time directly. It asks a [`Clock`] for
//! the current time and for a [`TickSource`] that yields base-interval tick
//! timestamps. [`SystemClock`] is backed by a tokio interval aligned to the
//! period boundary; [`MockClock`] only moves when [`MockClock::advance`] is
//! called, which makes multi-tick behavior testable without waiting.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// A source of the current time and of periodic ticks.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Creates a tick source firing every `period`.
    ///
    /// Must be called from within a tokio runtime.
    fn ticker(&self, period: Duration) -> Box<dyn TickSource>;
}

/// A stream of strictly increasing tick timestamps.
pub trait TickSource: Send {
    /// Waits for the next tick and returns its timestamp.
    fn tick(&mut self) -> Pin<Box<dyn Future<Output = DateTime<Utc>> + Send + '_>>;
}

fn to_delta(period: Duration) -> TimeDelta {
    TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX)
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, period: Duration) -> Box<dyn TickSource> {
        Box::new(IntervalTicker::aligned(Utc::now(), period))
    }
}

/// Ticks on every multiple of the period since the Unix epoch.
///
/// Missed ticks are delivered in a burst rather than skipped, and timestamps
/// are computed from the first boundary, so slow consumers never cause drift.
struct IntervalTicker {
    interval: Interval,
    next: DateTime<Utc>,
    period: TimeDelta,
}

impl IntervalTicker {
    fn aligned(now: DateTime<Utc>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
        let now_ms = now.timestamp_millis();
        let next_ms = (now_ms / period_ms + 1).saturating_mul(period_ms);
        let next = DateTime::from_timestamp_millis(next_ms).unwrap_or(now);
        let delay = Duration::from_millis(u64::try_from(next_ms - now_ms).unwrap_or(0));

        let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        Self {
            interval,
            next,
            period: to_delta(period),
        }
    }
}

impl TickSource for IntervalTicker {
    fn tick(&mut self) -> Pin<Box<dyn Future<Output = DateTime<Utc>> + Send + '_>> {
        Box::pin(async move {
            self.interval.tick().await;
            let tick = self.next;
            self.next = tick + self.period;
            tick
        })
    }
}

/// A manually advanced clock for deterministic tests.
///
/// Cloning shares the underlying time.
#[derive(Debug, Clone)]
pub struct MockClock {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    now: DateTime<Utc>,
    timers: Vec<MockTimer>,
}

#[derive(Debug)]
struct MockTimer {
    next: DateTime<Utc>,
    period: TimeDelta,
    tx: mpsc::UnboundedSender<DateTime<Utc>>,
}

impl MockClock {
    /// Creates a mock clock starting at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::at(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Creates a mock clock starting at `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                now,
                timers: Vec::new(),
            })),
        }
    }

    /// Moves time forward by `duration` and returns the new time.
    ///
    /// Every tick that falls within the advanced span fires, in timestamp
    /// order, each carrying its own scheduled time.
    pub fn advance(&self, duration: Duration) -> DateTime<Utc> {
        let mut state = self.inner.lock();
        let target = state.now + to_delta(duration);

        loop {
            let due = state
                .timers
                .iter_mut()
                .filter(|t| t.next <= target)
                .min_by_key(|t| t.next);
            let Some(timer) = due else { break };

            let tick = timer.next;
            timer.next = tick + timer.period;
            // A closed receiver just means the ticker was dropped.
            let _ = timer.tx.send(tick);
            state.now = tick;
        }

        state.now = target;
        state.timers.retain(|t| !t.tx.is_closed());
        target
    }

    /// Returns the number of live tickers created from this clock.
    #[must_use]
    pub fn ticker_count(&self) -> usize {
        self.inner
            .lock()
            .timers
            .iter()
            .filter(|t| !t.tx.is_closed())
            .count()
    }

    /// Waits until at least `count` tickers are registered.
    ///
    /// Tests use this to make sure the scheduler is listening before the
    /// first [`advance`](Self::advance).
    pub async fn wait_for_tickers(&self, count: usize) {
        while self.ticker_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().now
    }

    fn ticker(&self, period: Duration) -> Box<dyn TickSource> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        let period = to_delta(period.max(Duration::from_millis(1)));
        let next = state.now + period;
        state.timers.push(MockTimer { next, period, tx });
        Box::new(MockTicker { rx })
    }
}

struct MockTicker {
    rx: mpsc::UnboundedReceiver<DateTime<Utc>>,
}

impl TickSource for MockTicker {
    fn tick(&mut self) -> Pin<Box<dyn Future<Output = DateTime<Utc>> + Send + '_>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(tick) => tick,
                // The clock is gone; no tick will ever arrive.
                None => std::future::pending().await,
            }
        })
    }
}
