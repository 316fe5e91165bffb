//! Error types for the claw-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alert scheduler.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert definition.
    #[error("invalid alert definition: {reason}")]
    InvalidDefinition {
        /// The reason the definition is invalid.
        reason: String,
    },

    /// Alert definition with the given key was not found.
    #[error("alert definition not found: {key}")]
    DefinitionNotFound {
        /// The definition key that was not found.
        key: String,
    },

    /// Alert definition with the given key already exists.
    #[error("alert definition already exists: {key}")]
    DefinitionExists {
        /// The conflicting definition key.
        key: String,
    },

    /// The backing store failed a read or write.
    #[error("store error: {reason}")]
    Store {
        /// The reason the store operation failed.
        reason: String,
    },

    /// The evaluation engine failed to evaluate a definition.
    #[error("evaluation failed: {reason}")]
    Evaluation {
        /// The reason the evaluation failed.
        reason: String,
    },

    /// A state transition could not be delivered.
    #[error("notification failed on {channel}: {reason}")]
    NotificationFailed {
        /// The notifier that failed.
        channel: String,
        /// The reason delivery failed.
        reason: String,
    },

    /// Invalid scheduler or daemon configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The state cache was already warmed from the store.
    #[error("state cache already warmed")]
    AlreadyWarmed,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),

    /// The scheduler was cancelled.
    #[error("scheduler cancelled")]
    Cancelled,
}

impl AlertError {
    /// Shorthand for a [`AlertError::Store`] error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`AlertError::Evaluation`] error.
    pub fn evaluation(reason: impl Into<String>) -> Self {
        Self::Evaluation {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AlertError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_definition() {
        let err = AlertError::InvalidDefinition {
            reason: "empty title".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert definition: empty title");
    }

    #[test]
    fn error_display_definition_not_found() {
        let err = AlertError::DefinitionNotFound {
            key: "org_id=1, uid=abc".to_string(),
        };
        assert_eq!(err.to_string(), "alert definition not found: org_id=1, uid=abc");
    }

    #[test]
    fn error_display_store() {
        let err = AlertError::store("connection refused");
        assert_eq!(err.to_string(), "store error: connection refused");
    }

    #[test]
    fn error_display_evaluation() {
        let err = AlertError::evaluation("metric source unavailable");
        assert_eq!(
            err.to_string(),
            "evaluation failed: metric source unavailable"
        );
    }

    #[test]
    fn error_display_notification_failed() {
        let err = AlertError::NotificationFailed {
            channel: "chan".to_string(),
            reason: "channel full".to_string(),
        };
        assert_eq!(err.to_string(), "notification failed on chan: channel full");
    }

    #[test]
    fn error_display_already_warmed() {
        assert_eq!(
            AlertError::AlreadyWarmed.to_string(),
            "state cache already warmed"
        );
    }

    #[test]
    fn error_display_cancelled() {
        assert_eq!(AlertError::Cancelled.to_string(), "scheduler cancelled");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::Serialization(_)));
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let alert_err: AlertError = io_err.into();
        assert!(matches!(alert_err, AlertError::Io(_)));
    }
}
