//! Scheduler configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::store::OrgScope;

/// Configuration for the evaluation scheduler and its state tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base tick period in seconds. Definition intervals are multiples of it.
    pub base_interval_secs: u64,
    /// How long an instance stays in its state without a new evaluation.
    pub resolve_window_secs: u64,
    /// How long to wait for a dispatcher to acknowledge a stop.
    pub stop_timeout_ms: u64,
    /// Evaluation history kept per instance; `0` keeps everything.
    pub max_history: usize,
    /// Organizations to schedule; all when absent.
    pub org_ids: Option<Vec<i64>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 10,
            resolve_window_secs: 60,
            stop_timeout_ms: 5_000,
            max_history: 100,
            org_ids: None,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| AlertError::InvalidConfig {
            reason: format!("failed to read config file '{}': {e}", path.as_ref().display()),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| AlertError::InvalidConfig {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.base_interval_secs == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "base_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.stop_timeout_ms == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "stop_timeout_ms must be greater than 0".to_string(),
            });
        }

        if let Some(orgs) = &self.org_ids {
            if orgs.is_empty() {
                return Err(AlertError::InvalidConfig {
                    reason: "org_ids must not be empty when set; omit it to schedule all orgs".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Returns the base tick period.
    #[must_use]
    pub const fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }

    /// Returns the resolve window.
    #[must_use]
    pub const fn resolve_window(&self) -> Duration {
        Duration::from_secs(self.resolve_window_secs)
    }

    /// Returns the stop acknowledgment timeout.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Returns the organizations to schedule.
    #[must_use]
    pub fn org_scope(&self) -> OrgScope {
        self.org_ids
            .as_ref()
            .map_or(OrgScope::All, |orgs| OrgScope::orgs(orgs.iter().copied()))
    }
}
