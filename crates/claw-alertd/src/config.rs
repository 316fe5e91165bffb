//! Daemon configuration.
//!
//! The daemon reads a single TOML file holding:
//! - Where alert definitions and instance rows are persisted
//! - Where the metrics snapshot evaluated by conditions lives
//! - The log output format
//! - The `[scheduler]` table passed through to `claw-alerts`

use std::fmt;
use std::path::{Path, PathBuf};

use claw_alerts::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// JSON file holding alert definitions and instance rows.
    pub store_path: PathBuf,
    /// JSON file holding the current metric samples.
    pub metrics_path: PathBuf,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("/var/lib/claw-alertd/alerts.json"),
            metrics_path: PathBuf::from("/var/lib/claw-alertd/metrics.json"),
            log_format: LogFormat::Text,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, DaemonError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DaemonError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, DaemonError> {
        toml::to_string_pretty(self).map_err(|e| DaemonError::Config(format!("failed to render TOML: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(DaemonError::Config("store_path cannot be empty".to_string()));
        }

        if self.metrics_path.as_os_str().is_empty() {
            return Err(DaemonError::Config("metrics_path cannot be empty".to_string()));
        }

        if self.store_path == self.metrics_path {
            return Err(DaemonError::Config(
                "store_path and metrics_path must be different files".to_string(),
            ));
        }

        self.scheduler
            .validate()
            .map_err(|e| DaemonError::Config(format!("scheduler: {e}")))
    }
}
