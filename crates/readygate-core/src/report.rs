//! JSON summary of a gate run, for log shippers and CI artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::gate::{GateOutcome, GateResult, ReadinessState};

/// Serialized outcome of one gate invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target: String,
    pub readiness: ReadinessState,
    pub attempts: u32,
    pub wait_ms: u64,
    /// `None` when readiness was never reached.
    pub verification: Option<GateResult>,
    pub verification_exit_code: Option<i32>,
    pub workload_exit_code: Option<i32>,
    pub exit_code: i32,
    /// Error message when the gate aborted.
    pub error: Option<String>,
}

impl GateReport {
    /// Report for a gate that ran to an outcome.
    pub fn from_outcome(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: &GateOutcome,
    ) -> Self {
        let readiness = outcome.readiness();
        let verification = outcome.verification();
        let workload_exit_code = match outcome {
            GateOutcome::Launched { exit_code, .. } => Some(*exit_code),
            _ => None,
        };
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            target: readiness.target.clone(),
            readiness: readiness.state,
            attempts: readiness.attempts,
            wait_ms: readiness.elapsed_ms,
            verification: Some(verification.result),
            verification_exit_code: verification.stage.as_ref().map(|s| s.exit_code),
            workload_exit_code,
            exit_code: outcome.exit_code(),
            error: None,
        }
    }

    /// Report for a gate that aborted with an error.
    pub fn from_error(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        target: impl Into<String>,
        error: &GateError,
        exit_code: i32,
    ) -> Self {
        let attempts = match error {
            GateError::ReadinessExhausted { attempts, .. }
            | GateError::ReadinessTimedOut { attempts, .. } => *attempts,
            _ => 0,
        };
        let readiness = match error {
            GateError::Launch { .. } => ReadinessState::Ready,
            _ => ReadinessState::Waiting,
        };
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            target: target.into(),
            readiness,
            attempts,
            wait_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
            verification: None,
            verification_exit_code: None,
            workload_exit_code: None,
            exit_code,
            error: Some(error.to_string()),
        }
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
