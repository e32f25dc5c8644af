//! In-memory fakes for the gate's injected dependencies (testing only)
//!
//! Provides `ScriptedProbe`, `HangingProbe`, `StaticVerifier`, and
//! `RecordingLauncher` so gate transitions can be exercised without sockets
//! or processes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GateError, ProbeError, Result};
use crate::gate::{Launcher, Verifier};
use crate::probe::ReadinessProbe;
use crate::runner::StageResult;
use crate::stage::StageConfig;

// ---------------------------------------------------------------------------
// ScriptedProbe
// ---------------------------------------------------------------------------

/// Probe that fails a fixed number of times, then reports ready.
#[derive(Debug)]
pub struct ScriptedProbe {
    failures: Option<u32>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// Fail the first `failures` attempts, succeed afterwards.
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Never succeed.
    pub fn never_ready() -> Self {
        Self {
            failures: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of probe attempts seen so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn probe(&self) -> std::result::Result<(), ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.failures {
            Some(failures) if call > failures => Ok(()),
            _ => Err(ProbeError::Unreachable {
                target: self.describe(),
                reason: format!("scripted failure #{call}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// HangingProbe
// ---------------------------------------------------------------------------

/// Probe that stalls on every attempt, like a connect to a black-holed host.
#[derive(Debug)]
pub struct HangingProbe {
    /// `None` never returns.
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl HangingProbe {
    /// Fail each attempt after `delay`.
    pub fn failing_after(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            calls: AtomicU32::new(0),
        }
    }

    /// Never complete an attempt.
    pub fn forever() -> Self {
        Self {
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for HangingProbe {
    fn describe(&self) -> String {
        "hanging".to_string()
    }

    async fn probe(&self) -> std::result::Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
        Err(ProbeError::Unreachable {
            target: self.describe(),
            reason: "no answer".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticVerifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Verdict {
    Exit(i32),
    Error,
}

/// Verifier with a fixed verdict that counts its invocations.
#[derive(Debug)]
pub struct StaticVerifier {
    verdict: Verdict,
    calls: AtomicU32,
}

impl StaticVerifier {
    pub fn passing() -> Self {
        Self::with_verdict(Verdict::Exit(0))
    }

    pub fn failing(exit_code: i32) -> Self {
        Self::with_verdict(Verdict::Exit(exit_code))
    }

    /// Behave like a verification command that could not be spawned.
    pub fn erroring() -> Self {
        Self::with_verdict(Verdict::Error)
    }

    fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, stage: &StageConfig) -> Result<StageResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.verdict {
            Verdict::Exit(exit_code) => Ok(StageResult {
                stage_name: stage.name.clone(),
                exit_code,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
                success: exit_code == 0,
            }),
            Verdict::Error => Err(GateError::Spawn {
                stage: stage.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingLauncher
// ---------------------------------------------------------------------------

/// Launcher that records every workload it is asked to start.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    exit_code: i32,
    launched: Mutex<Vec<StageConfig>>,
}

impl RecordingLauncher {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    /// Workloads in launch order.
    pub fn launched(&self) -> Vec<StageConfig> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn launch(&self, workload: &StageConfig) -> Result<i32> {
        self.launched.lock().unwrap().push(workload.clone());
        Ok(self.exit_code)
    }
}
