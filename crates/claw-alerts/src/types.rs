//! Core types for the alert scheduler.
//!
//! This module provides the fundamental types used throughout the claw-alerts crate:
//! - [`AlertDefinitionKey`]: The stable identity of an alert definition
//! - [`AlertDefinition`]: A periodically evaluated alert definition
//! - [`AlertCondition`]: The condition a definition evaluates
//! - [`EvalState`]: The verdict vocabulary of the evaluation engine
//! - [`EvalResult`]: One verdict for one label set
//! - [`AlertInstance`]: A persisted instance row
//! - [`cache_id`]: The deterministic instance key used by the state tracker

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// A label set. Keys are kept sorted so that rendering is deterministic.
pub type Labels = BTreeMap<String, String>;

/// Renders a label set as `k1=v1, k2=v2` in key order.
#[must_use]
pub fn labels_to_string(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the state tracker key for one (definition, label set) instance.
///
/// The empty label set maps to the bare UID.
#[must_use]
pub fn cache_id(definition_uid: &str, labels: &Labels) -> String {
    if labels.is_empty() {
        definition_uid.to_string()
    } else {
        format!("{definition_uid} {}", labels_to_string(labels))
    }
}

/// Identity of an alert definition: organization plus UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertDefinitionKey {
    /// Owning organization.
    pub org_id: i64,
    /// Definition UID, unique within the organization.
    pub uid: String,
}

impl AlertDefinitionKey {
    /// Creates a new key.
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for AlertDefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{org_id: {}, uid: {}}}", self.org_id, self.uid)
    }
}

/// Comparison operators for alert conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Evaluates the comparison between two values.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// The condition a definition evaluates: a threshold over a labelled metric.
///
/// The scheduler never inspects it; only the evaluation engine does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// The name of the metric to evaluate.
    pub metric_name: String,
    /// The comparison operator.
    pub operator: ComparisonOperator,
    /// The threshold value to compare against.
    pub threshold: f64,
    /// Series must carry all of these labels to be considered.
    #[serde(default)]
    pub label_filters: Labels,
}

impl AlertCondition {
    /// Creates a new alert condition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidDefinition` if the metric name is empty.
    pub fn new(
        metric_name: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<Self> {
        let metric_name = metric_name.into();
        if metric_name.is_empty() {
            return Err(AlertError::InvalidDefinition {
                reason: "metric name cannot be empty".to_string(),
            });
        }

        Ok(Self {
            metric_name,
            operator,
            threshold,
            label_filters: Labels::new(),
        })
    }

    /// Adds a label filter to this condition.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_filters.insert(key.into(), value.into());
        self
    }

    /// Evaluates the condition against a metric value.
    #[must_use]
    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }

    /// Returns true if a series with `labels` is selected by the label filters.
    #[must_use]
    pub fn selects(&self, labels: &Labels) -> bool {
        self.label_filters
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.metric_name, self.operator, self.threshold
        )
    }
}

/// A periodically evaluated alert definition, as observed in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Owning organization.
    pub org_id: i64,
    /// Definition UID.
    pub uid: String,
    /// Human-readable title.
    pub title: String,
    /// The evaluable condition.
    pub condition: AlertCondition,
    /// Evaluation interval in seconds; `0` means never scheduled.
    pub interval_seconds: i64,
    /// Whether scheduling is paused.
    #[serde(default)]
    pub paused: bool,
    /// Revision, bumped on every update.
    pub version: i64,
    /// Time of the last update.
    pub updated: DateTime<Utc>,
}

impl AlertDefinition {
    /// Maximum allowed length for titles.
    pub const MAX_TITLE_LENGTH: usize = 190;

    /// Returns the definition's key.
    #[must_use]
    pub fn key(&self) -> AlertDefinitionKey {
        AlertDefinitionKey::new(self.org_id, self.uid.clone())
    }

    /// Returns true if the definition should have a running dispatcher.
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        !self.paused && self.interval_seconds > 0
    }

    /// Validates the definition fields the scheduler depends on.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidDefinition` if the UID or title is empty,
    /// the title is too long, or the interval is negative.
    pub fn validate(&self) -> Result<()> {
        if self.uid.is_empty() {
            return Err(AlertError::InvalidDefinition {
                reason: "uid cannot be empty".to_string(),
            });
        }
        validate_title(&self.title)?;
        validate_interval(self.interval_seconds)
    }
}

pub(crate) fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() {
        return Err(AlertError::InvalidDefinition {
            reason: "title cannot be empty".to_string(),
        });
    }
    if title.len() > AlertDefinition::MAX_TITLE_LENGTH {
        return Err(AlertError::InvalidDefinition {
            reason: format!(
                "title exceeds maximum length of {} characters",
                AlertDefinition::MAX_TITLE_LENGTH
            ),
        });
    }
    Ok(())
}

pub(crate) fn validate_interval(interval_seconds: i64) -> Result<()> {
    if interval_seconds < 0 {
        return Err(AlertError::InvalidDefinition {
            reason: format!("interval must be >= 0, got {interval_seconds}"),
        });
    }
    Ok(())
}

/// The verdict vocabulary of the evaluation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalState {
    /// The condition does not hold.
    #[default]
    Normal,
    /// The condition holds.
    Alerting,
    /// The query returned no data.
    NoData,
    /// The evaluation failed.
    Error,
}

impl EvalState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Alerting => "alerting",
            Self::NoData => "nodata",
            Self::Error => "error",
        }
    }

    /// Returns true for [`EvalState::Normal`].
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One verdict returned by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    /// The label set this verdict applies to.
    pub labels: Labels,
    /// The verdict.
    pub state: EvalState,
    /// Error message for [`EvalState::Error`] verdicts.
    pub error: Option<String>,
}

impl EvalResult {
    /// Creates a verdict without an error message.
    #[must_use]
    pub fn new(labels: Labels, state: EvalState) -> Self {
        Self {
            labels,
            state,
            error: None,
        }
    }

    /// Creates an [`EvalState::Error`] verdict.
    #[must_use]
    pub fn error(labels: Labels, message: impl Into<String>) -> Self {
        Self {
            labels,
            state: EvalState::Error,
            error: Some(message.into()),
        }
    }
}

/// The persisted vocabulary of instance rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Not alerting.
    Normal,
    /// Alerting.
    Firing,
    /// No data.
    NoData,
    /// Evaluation error.
    Error,
}

impl From<EvalState> for InstanceState {
    fn from(state: EvalState) -> Self {
        match state {
            EvalState::Normal => Self::Normal,
            EvalState::Alerting => Self::Firing,
            EvalState::NoData => Self::NoData,
            EvalState::Error => Self::Error,
        }
    }
}

impl From<InstanceState> for EvalState {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::Normal => Self::Normal,
            InstanceState::Firing => Self::Alerting,
            InstanceState::NoData => Self::NoData,
            InstanceState::Error => Self::Error,
        }
    }
}

/// A persisted alert instance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInstance {
    /// Organization of the owning definition.
    pub definition_org_id: i64,
    /// UID of the owning definition.
    pub definition_uid: String,
    /// Instance labels.
    pub labels: Labels,
    /// Current state.
    pub current_state: InstanceState,
    /// Start of the current state.
    pub current_state_since: DateTime<Utc>,
    /// Expiry of the current state.
    pub current_state_end: DateTime<Utc>,
    /// Time of the last evaluation.
    pub last_eval_time: DateTime<Utc>,
}

impl AlertInstance {
    /// Returns the key of the owning definition.
    #[must_use]
    pub fn definition_key(&self) -> AlertDefinitionKey {
        AlertDefinitionKey::new(self.definition_org_id, self.definition_uid.clone())
    }

    /// Returns the state tracker key of this instance.
    #[must_use]
    pub fn cache_id(&self) -> String {
        cache_id(&self.definition_uid, &self.labels)
    }
}
