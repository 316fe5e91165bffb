//! Evaluation engine seam.
//!
//! The scheduler hands a definition and the tick timestamp to an
//! [`EvaluationEngine`] and folds back one verdict per label set. The bundled
//! [`ConditionEngine`] evaluates a definition's threshold condition against
//! labelled samples from a [`MetricSource`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::types::{AlertDefinition, EvalResult, EvalState, Labels};

/// Future returned by [`EvaluationEngine::evaluate`].
pub type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<EvalResult>>> + Send + 'a>>;

/// Executes a definition's condition.
pub trait EvaluationEngine: Send + Sync + fmt::Debug {
    /// Evaluates `definition` as of `tick`.
    ///
    /// `tick` is the evaluation time; implementations must not substitute the
    /// wall clock for it.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Evaluation` if the condition cannot be evaluated
    /// at all. The scheduler folds that into a single error verdict.
    fn evaluate<'a>(&'a self, definition: &'a AlertDefinition, tick: DateTime<Utc>) -> EvalFuture<'a>;
}

/// One labelled metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Series labels.
    #[serde(default)]
    pub labels: Labels,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Creates a sample.
    #[must_use]
    pub fn new(labels: Labels, value: f64) -> Self {
        Self { labels, value }
    }
}

/// Provides the current samples of a metric.
pub trait MetricSource: Send + Sync + fmt::Debug {
    /// Returns every series of `metric_name` as of `at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be queried.
    fn query(&self, metric_name: &str, at: DateTime<Utc>) -> Result<Vec<Sample>>;
}

/// A metric source holding fixed samples, replaced wholesale by callers.
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    series: RwLock<HashMap<String, Vec<Sample>>>,
}

impl StaticMetricSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the samples of `metric_name`.
    pub fn set(&self, metric_name: impl Into<String>, samples: Vec<Sample>) {
        self.series.write().insert(metric_name.into(), samples);
    }

    /// Removes all samples of `metric_name`.
    pub fn clear(&self, metric_name: &str) {
        self.series.write().remove(metric_name);
    }
}

impl MetricSource for StaticMetricSource {
    fn query(&self, metric_name: &str, _at: DateTime<Utc>) -> Result<Vec<Sample>> {
        Ok(self
            .series
            .read()
            .get(metric_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Evaluates threshold conditions against a [`MetricSource`].
#[derive(Debug, Clone)]
pub struct ConditionEngine {
    source: Arc<dyn MetricSource>,
}

impl ConditionEngine {
    /// Creates an engine reading from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    fn verdicts(&self, definition: &AlertDefinition, tick: DateTime<Utc>) -> Result<Vec<EvalResult>> {
        let condition = &definition.condition;
        let samples = self.source.query(&condition.metric_name, tick)?;

        let results: Vec<EvalResult> = samples
            .into_iter()
            .filter(|s| condition.selects(&s.labels))
            .map(|s| {
                if !s.value.is_finite() {
                    EvalResult::error(s.labels, format!("non-finite value {}", s.value))
                } else if condition.evaluate(s.value) {
                    EvalResult::new(s.labels, EvalState::Alerting)
                } else {
                    EvalResult::new(s.labels, EvalState::Normal)
                }
            })
            .collect();

        if results.is_empty() {
            debug!(definition = %definition.key(), metric = %condition.metric_name, "no matching series");
            return Ok(vec![EvalResult::new(Labels::new(), EvalState::NoData)]);
        }
        Ok(results)
    }
}

impl EvaluationEngine for ConditionEngine {
    fn evaluate<'a>(&'a self, definition: &'a AlertDefinition, tick: DateTime<Utc>) -> EvalFuture<'a> {
        Box::pin(async move { self.verdicts(definition, tick) })
    }
}
