//! Unified error type hierarchy for GOATd Validator
//!
//! Provides structured error handling with HarnessError (the session-level
//! taxonomy), ExecError (remote execution boundary) and ConfigError (config
//! file handling).

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Session-level error taxonomy.
///
/// Non-fatal variants are absorbed into the `ResultAggregator` and only show
/// up in the final score. Fatal variants abort the session before scoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// A workload did not meet its success criteria or crashed.
    #[error("Workload '{workload}' failed: {reason}")]
    WorkloadFailure { workload: String, reason: String },

    /// A workload was cancelled after exceeding its allotment.
    #[error("Workload '{workload}' exceeded its allotment of {allotted:?}")]
    WorkloadTimeout { workload: String, allotted: Duration },

    /// A telemetry sample could not be read.
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// The target cannot be reached at all.
    #[error("Target unreachable: {0}")]
    ConnectivityFailure(String),

    /// Phase table, weights or budget are inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A workload was stopped because the session was aborted.
    #[error("Workload '{workload}' cancelled")]
    Cancelled { workload: String },
}

impl HarnessError {
    /// Fatal errors abort the session and bypass scoring.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::ConnectivityFailure(_) | HarnessError::Configuration(_)
        )
    }

    /// Attach a workload name to a transport error.
    pub fn from_exec(workload: &str, err: ExecError) -> Self {
        match err {
            ExecError::Connectivity(msg) => HarnessError::ConnectivityFailure(msg),
            ExecError::Timeout(allotted) => HarnessError::WorkloadTimeout {
                workload: workload.to_string(),
                allotted,
            },
            ExecError::Cancelled => HarnessError::Cancelled {
                workload: workload.to_string(),
            },
            other => HarnessError::WorkloadFailure {
                workload: workload.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for HarnessError {
    fn from(e: ConfigError) -> Self {
        HarnessError::Configuration(e.to_string())
    }
}

/// Errors raised by a `RemoteExecutor`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("Connection to target failed: {0}")]
    Connectivity(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Command cancelled")]
    Cancelled,

    #[error("Command exited with status {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("I/O error during command execution: {0}")]
    Io(String),
}

impl From<io::Error> for ExecError {
    fn from(e: io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::InvalidToml(e.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::InvalidToml(e.to_string())
    }
}

/// Top-level result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
