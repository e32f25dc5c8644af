//! Error taxonomy for the startup gate.

use std::path::PathBuf;

/// Why a single readiness probe attempt did not succeed.
///
/// Probe failures are expected while a dependency boots; the gate retries
/// them and only logs the detail.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection to {target} failed: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("probe of {target} timed out after {limit_ms}ms")]
    Timeout { target: String, limit_ms: u64 },

    #[error("{target} answered with HTTP {status}")]
    UnhealthyStatus { target: String, status: u16 },

    #[error("probe command {target} exited with code {exit_code}")]
    CommandFailed { target: String, exit_code: i32 },
}

/// Errors produced by the gate, the stage runner and the export job.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{target} not ready after {attempts} attempt(s)")]
    ReadinessExhausted { target: String, attempts: u32 },

    #[error("{target} not ready within {limit_ms}ms ({attempts} attempt(s))")]
    ReadinessTimedOut {
        target: String,
        attempts: u32,
        limit_ms: u64,
    },

    #[error("stage {stage} has an empty command")]
    EmptyCommand { stage: String },

    #[error("stage {stage} timed out after {timeout_secs} seconds")]
    StageTimeout { stage: String, timeout_secs: u64 },

    #[error("failed to spawn stage {stage}: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch workload {stage}: {reason}")]
    Launch { stage: String, reason: String },

    #[error("export directory {} is not usable: {reason}", .path.display())]
    ExportDir { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
