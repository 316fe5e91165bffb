//! claw-alertd - Clawbernetes alert evaluation daemon
//!
//! Runs the `claw-alerts` scheduler against a JSON file store, evaluating
//! threshold conditions over a metrics snapshot that an external collector
//! keeps up to date. State survives restarts through the persisted instance
//! rows.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod metrics;

pub use config::{DaemonConfig, LogFormat};
pub use daemon::{CheckReport, Daemon, RunSummary};
pub use error::DaemonError;
pub use metrics::FileMetricSource;
