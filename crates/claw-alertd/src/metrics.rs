//! Metric snapshot read from disk.
//!
//! The snapshot is a JSON object mapping metric names to labelled samples:
//!
//! ```json
//! { "cpu_usage": [ { "labels": { "host": "gpu-01" }, "value": 93.5 } ] }
//! ```
//!
//! An external collector rewrites the file; every query re-reads it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use claw_alerts::{AlertError, MetricSource, Result, Sample};
use tracing::debug;

/// A [`MetricSource`] backed by a JSON snapshot file.
#[derive(Debug, Clone)]
pub struct FileMetricSource {
    path: PathBuf,
}

impl FileMetricSource {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, Vec<Sample>>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "metrics snapshot missing");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(AlertError::evaluation(format!(
                    "failed to read metrics snapshot '{}': {e}",
                    self.path.display()
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl MetricSource for FileMetricSource {
    fn query(&self, metric_name: &str, _at: DateTime<Utc>) -> Result<Vec<Sample>> {
        let mut snapshot = self.load()?;
        Ok(snapshot.remove(metric_name).unwrap_or_default())
    }
}
