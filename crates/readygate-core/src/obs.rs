//! Structured observability hooks for gate lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via the `GateSpan` RAII guard
//! - Emission functions for the gate's transitions: waiting, probe failure,
//!   ready, verified, launching, workload exit, export finished
//!
//! Events are emitted at `info!` (probe error detail at `debug!`).

use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::gate::GateResult;
use crate::retry::RetryPolicy;
use crate::runner::StageResult;
use crate::stage::StageConfig;

/// RAII guard that enters a run-scoped tracing span for one gate run.
///
/// # Example
///
/// ```ignore
/// let _span = GateSpan::enter("6f1c…");
/// // every event below carries run_id = "6f1c…"
/// ```
pub struct GateSpan {
    _span: tracing::span::EnteredSpan,
}

impl GateSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("readygate.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: readiness loop started.
pub fn emit_waiting(target: &str, policy: &RetryPolicy) {
    info!(
        event = "gate.waiting",
        dependency = %target,
        interval_ms = policy.interval_ms,
        max_attempts = ?policy.max_attempts,
        timeout_ms = ?policy.timeout_ms,
        "Waiting for dependency"
    );
}

/// Emit event: one probe attempt failed.
pub fn emit_probe_failed(target: &str, attempt: u32, error: &ProbeError) {
    info!(
        event = "gate.probe_failed",
        dependency = %target,
        attempt = attempt,
        "Dependency not ready"
    );
    debug!(dependency = %target, attempt = attempt, error = %error, "Probe error");
}

/// Emit event: dependency became ready.
pub fn emit_ready(target: &str, attempts: u32, elapsed_ms: u64) {
    info!(
        event = "gate.ready",
        dependency = %target,
        attempts = attempts,
        elapsed_ms = elapsed_ms,
        "Dependency ready"
    );
}

/// Emit event: verification stage finished.
pub fn emit_verified(stage: &StageResult, result: GateResult) {
    match result {
        GateResult::Passed => info!(
            event = "gate.verified",
            stage = %stage.stage_name,
            exit_code = stage.exit_code,
            duration_ms = stage.duration_ms,
            passed = true,
            "Verification passed"
        ),
        GateResult::Failed => {
            warn!(
                event = "gate.verified",
                stage = %stage.stage_name,
                exit_code = stage.exit_code,
                duration_ms = stage.duration_ms,
                passed = false,
                "Verification failed, workload will not start"
            );
            if !stage.stderr.is_empty() {
                debug!(stage = %stage.stage_name, stderr = %stage.stderr, "Verification stderr");
            }
        }
    }
}

/// Emit event: workload about to start.
pub fn emit_launching(workload: &StageConfig) {
    info!(
        event = "gate.launching",
        stage = %workload.name,
        command = %workload.display_command(),
        "Launching workload"
    );
}

/// Emit event: workload exited.
pub fn emit_workload_exited(stage: &str, exit_code: i32) {
    info!(event = "gate.workload_exited", stage = %stage, exit_code = exit_code);
}

/// Emit event: export job finished.
pub fn emit_export_finished(output_dir: &str, exit_code: i32, files: usize) {
    info!(
        event = "export.finished",
        output_dir = %output_dir,
        exit_code = exit_code,
        files = files,
    );
}
