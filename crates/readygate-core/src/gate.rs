//! The startup gate: wait for readiness, verify, then launch.
//!
//! Ordering rules:
//! - nothing after the readiness loop runs until a probe succeeds
//! - the workload runs only if verification passed (or none is configured)
//! - the workload is launched at most once per gate run

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::GateConfig;
use crate::error::{GateError, ProbeError, Result};
use crate::obs;
use crate::probe::{build_probe, ReadinessProbe};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::runner::{StageResult, StageRunner};
use crate::stage::StageConfig;

/// Exit code when the verification stage fails.
pub const EXIT_VERIFICATION_FAILED: i32 = 1;
/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code when a bounded readiness policy gives up.
pub const EXIT_NOT_READY: i32 = 3;
/// Exit code when the workload cannot be spawned.
pub const EXIT_LAUNCH_FAILED: i32 = 127;

/// Readiness of the dependency during one gate run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Waiting,
    Ready,
}

/// Outcome of the verification step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateResult {
    Passed,
    Failed,
}

/// Runs the verification stage.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, stage: &StageConfig) -> Result<StageResult>;
}

/// Starts the main workload and reports its exit code.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, workload: &StageConfig) -> Result<i32>;
}

/// Verifier that runs the stage as a child process.
pub struct ProcessVerifier;

#[async_trait]
impl Verifier for ProcessVerifier {
    async fn verify(&self, stage: &StageConfig) -> Result<StageResult> {
        StageRunner::execute_stage(stage).await
    }
}

/// Launcher that runs the workload in the foreground and waits for it.
///
/// Termination signals sent to readygate are forwarded to the workload.
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, workload: &StageConfig) -> Result<i32> {
        match StageRunner::supervise_stage(workload).await {
            Ok(exit_code) => Ok(exit_code),
            Err(GateError::Spawn { stage, source }) => Err(GateError::Launch {
                stage,
                reason: source.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// How the readiness loop ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessReport {
    pub target: String,
    /// Probe attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub state: ReadinessState,
}

/// Verification verdict plus the stage result, when a stage ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub result: GateResult,
    /// `None` when no verification stage is configured.
    pub stage: Option<StageResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.result == GateResult::Passed
    }
}

/// Final outcome of [`StartupGate::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Ready and verified; no workload configured.
    Ready {
        readiness: ReadinessReport,
        verification: VerificationReport,
    },
    /// Verification failed; the workload was not started.
    VerificationFailed {
        readiness: ReadinessReport,
        verification: VerificationReport,
    },
    /// The workload ran and exited with `exit_code`.
    Launched {
        readiness: ReadinessReport,
        verification: VerificationReport,
        exit_code: i32,
    },
}

impl GateOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            GateOutcome::Ready { .. } => 0,
            GateOutcome::VerificationFailed { .. } => EXIT_VERIFICATION_FAILED,
            GateOutcome::Launched { exit_code, .. } => *exit_code,
        }
    }

    pub fn readiness(&self) -> &ReadinessReport {
        match self {
            GateOutcome::Ready { readiness, .. }
            | GateOutcome::VerificationFailed { readiness, .. }
            | GateOutcome::Launched { readiness, .. } => readiness,
        }
    }

    pub fn verification(&self) -> &VerificationReport {
        match self {
            GateOutcome::Ready { verification, .. }
            | GateOutcome::VerificationFailed { verification, .. }
            | GateOutcome::Launched { verification, .. } => verification,
        }
    }

    pub fn launched(&self) -> bool {
        matches!(self, GateOutcome::Launched { .. })
    }
}

/// Sequential dependency-ready → verify → launch gate.
pub struct StartupGate {
    probe: Arc<dyn ReadinessProbe>,
    policy: RetryPolicy,
    verifier: Arc<dyn Verifier>,
    verify_stage: Option<StageConfig>,
    launcher: Arc<dyn Launcher>,
    workload: Option<StageConfig>,
}

impl StartupGate {
    /// Gate with no verification and no workload.
    pub fn new(probe: Arc<dyn ReadinessProbe>, policy: RetryPolicy) -> Self {
        Self {
            probe,
            policy,
            verifier: Arc::new(ProcessVerifier),
            verify_stage: None,
            launcher: Arc::new(ProcessLauncher),
            workload: None,
        }
    }

    /// Run `stage` through `verifier` once the dependency is ready.
    pub fn with_verification(mut self, verifier: Arc<dyn Verifier>, stage: StageConfig) -> Self {
        self.verifier = verifier;
        self.verify_stage = Some(stage);
        self
    }

    /// Launch `workload` through `launcher` after verification passes.
    pub fn with_workload(mut self, launcher: Arc<dyn Launcher>, workload: StageConfig) -> Self {
        self.launcher = launcher;
        self.workload = Some(workload);
        self
    }

    /// Build a gate with the production probe, verifier and launcher.
    ///
    /// Child stages receive `DB_HOST`/`DB_PORT` when a target is configured.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        config.validate()?;
        let probe = build_probe(config)?;
        let env = config
            .target
            .as_ref()
            .map(|t| t.env_vars().to_vec())
            .unwrap_or_default();

        let mut gate = Self::new(probe, config.policy.clone());
        if let Some(stage) = &config.verify {
            gate = gate.with_verification(
                Arc::new(ProcessVerifier),
                stage.clone().with_envs(env.clone()),
            );
        }
        if let Some(stage) = &config.workload {
            gate = gate.with_workload(Arc::new(ProcessLauncher), stage.clone().with_envs(env));
        }
        Ok(gate)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// A single probe, no retry.
    pub async fn check(&self) -> std::result::Result<(), ProbeError> {
        self.probe_within(self.policy.probe_timeout()).await
    }

    /// One attempt, cut off after `bound`.
    async fn probe_within(&self, bound: Duration) -> std::result::Result<(), ProbeError> {
        match tokio::time::timeout(bound, self.probe.probe()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ProbeError::Timeout {
                target: self.probe.describe(),
                limit_ms: bound.as_millis() as u64,
            }),
        }
    }

    /// Poll the dependency until it is ready or the policy gives up.
    ///
    /// Sleeps exactly the policy interval between failed attempts. Each
    /// attempt is bounded by the probe timeout and, when a deadline is set,
    /// by the time left before it, so the loop never runs past the deadline.
    pub async fn wait_ready(&self) -> Result<ReadinessReport> {
        let target = self.probe.describe();
        let started = Instant::now();
        let deadline = self.policy.timeout();
        let mut state = ReadinessState::Waiting;
        let mut attempts = 0u32;

        obs::emit_waiting(&target, &self.policy);

        while state == ReadinessState::Waiting {
            let mut bound = self.policy.probe_timeout();
            if let Some(limit) = deadline {
                let remaining = limit.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(self.timed_out(target, attempts));
                }
                bound = bound.min(remaining);
            }

            attempts += 1;
            match self.probe_within(bound).await {
                Ok(()) => {
                    state = ReadinessState::Ready;
                }
                Err(err) => {
                    let elapsed = started.elapsed();
                    obs::emit_probe_failed(&target, attempts, &err);
                    match self.policy.after_failure(attempts, elapsed) {
                        RetryDecision::Retry(interval) => tokio::time::sleep(interval).await,
                        RetryDecision::Exhausted => {
                            return Err(GateError::ReadinessExhausted { target, attempts });
                        }
                        RetryDecision::DeadlineExceeded => {
                            return Err(self.timed_out(target, attempts));
                        }
                    }
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        obs::emit_ready(&target, attempts, elapsed_ms);

        Ok(ReadinessReport {
            target,
            attempts,
            elapsed_ms,
            state,
        })
    }

    fn timed_out(&self, target: String, attempts: u32) -> GateError {
        GateError::ReadinessTimedOut {
            target,
            attempts,
            limit_ms: self.policy.timeout_ms.unwrap_or_default(),
        }
    }

    /// Run the verification stage, if any.
    ///
    /// A stage that cannot be spawned or times out counts as failed.
    pub async fn verify(&self) -> VerificationReport {
        let Some(stage) = &self.verify_stage else {
            debug!("No verification stage configured, skipping");
            return VerificationReport {
                result: GateResult::Passed,
                stage: None,
            };
        };

        let stage_result = match self.verifier.verify(stage).await {
            Ok(result) => result,
            Err(e) => StageResult::not_run(stage.name.clone(), e.to_string()),
        };
        let result = if stage_result.passed() {
            GateResult::Passed
        } else {
            GateResult::Failed
        };
        obs::emit_verified(&stage_result, result);

        VerificationReport {
            result,
            stage: Some(stage_result),
        }
    }

    /// Wait, verify, and launch the workload if verification passed.
    pub async fn run(&self) -> Result<GateOutcome> {
        let readiness = self.wait_ready().await?;
        let verification = self.verify().await;

        if !verification.passed() {
            return Ok(GateOutcome::VerificationFailed {
                readiness,
                verification,
            });
        }

        let Some(workload) = &self.workload else {
            return Ok(GateOutcome::Ready {
                readiness,
                verification,
            });
        };

        obs::emit_launching(workload);
        let exit_code = self.launcher.launch(workload).await?;
        obs::emit_workload_exited(&workload.name, exit_code);

        Ok(GateOutcome::Launched {
            readiness,
            verification,
            exit_code,
        })
    }
}
