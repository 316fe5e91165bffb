//! State transition delivery.
//!
//! Every time an instance's categorical state changes, the dispatcher hands a
//! [`StateTransition`] to a [`TransitionNotifier`]. Delivery is at-least-once;
//! receivers must handle duplicates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{AlertError, Result};
use crate::types::{labels_to_string, AlertDefinitionKey, EvalState, Labels};

/// A change of an instance's categorical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Tracker key of the instance.
    pub cache_id: String,
    /// Owning definition.
    pub definition: AlertDefinitionKey,
    /// Instance labels.
    pub labels: Labels,
    /// State before the evaluation.
    pub previous: EvalState,
    /// State after the evaluation.
    pub current: EvalState,
    /// Start of the current non-normal episode.
    pub starts_at: DateTime<Utc>,
    /// Auto-resolve deadline after this evaluation.
    pub ends_at: DateTime<Utc>,
    /// The tick that produced the change.
    pub tick: DateTime<Utc>,
}

impl StateTransition {
    /// Returns true if the instance left the normal state.
    #[must_use]
    pub const fn is_firing(&self) -> bool {
        !self.current.is_normal()
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.cache_id, self.previous, self.current)
    }
}

/// Receives state transitions.
///
/// Implement this trait to bridge transitions into a notification or routing
/// layer.
pub trait TransitionNotifier: Send + Sync + fmt::Debug {
    /// Returns the name of this notifier.
    fn name(&self) -> &str;

    /// Delivers one transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition could not be handed off.
    fn notify(&self, transition: &StateTransition) -> Result<()>;
}

/// Writes transitions to the tracing log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    /// Creates a new log notifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new("log")
    }
}

impl TransitionNotifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, transition: &StateTransition) -> Result<()> {
        let labels = labels_to_string(&transition.labels);
        if transition.is_firing() {
            warn!(
                definition = %transition.definition,
                labels = %labels,
                previous = %transition.previous,
                state = %transition.current,
                since = %transition.starts_at,
                "ALERT"
            );
        } else {
            info!(
                definition = %transition.definition,
                labels = %labels,
                previous = %transition.previous,
                "RESOLVED"
            );
        }
        Ok(())
    }
}

/// Forwards transitions into a bounded tokio channel.
///
/// The send never waits: a full or closed channel is reported as an error so
/// the evaluation loop is never held up by a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    name: String,
    tx: mpsc::Sender<StateTransition>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving half of its channel.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<StateTransition>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl TransitionNotifier for ChannelNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, transition: &StateTransition) -> Result<()> {
        self.tx.try_send(transition.clone()).map_err(|err| {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            AlertError::NotificationFailed {
                channel: self.name.clone(),
                reason: reason.to_string(),
            }
        })
    }
}

/// Delivers each transition to every inner notifier.
///
/// Individual failures are logged and do not stop delivery to the rest.
#[derive(Debug, Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn TransitionNotifier>>,
}

impl FanoutNotifier {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a notifier.
    #[must_use]
    pub fn with(mut self, notifier: impl TransitionNotifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// Adds a boxed notifier.
    pub fn push(&mut self, notifier: Box<dyn TransitionNotifier>) {
        self.notifiers.push(notifier);
    }

    /// Returns the number of inner notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Returns true if there are no inner notifiers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl TransitionNotifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    fn notify(&self, transition: &StateTransition) -> Result<()> {
        let mut failed = 0usize;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(transition) {
                failed += 1;
                error!(
                    notifier = %notifier.name(),
                    cache_id = %transition.cache_id,
                    error = %e,
                    "failed to deliver state transition"
                );
            }
        }

        if failed > 0 && failed == self.notifiers.len() {
            return Err(AlertError::NotificationFailed {
                channel: self.name().to_string(),
                reason: format!("all {failed} notifiers failed"),
            });
        }
        Ok(())
    }
}
