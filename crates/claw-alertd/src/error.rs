//! Error types for claw-alertd.

use thiserror::Error;

/// Errors that can occur while running the alert daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The scheduler, store, or engine failed.
    #[error(transparent)]
    Alerts(#[from] claw_alerts::AlertError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
