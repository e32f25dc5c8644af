//! readygate core - readiness-gated startup
//!
//! Provides a startup gate that:
//! - Polls a dependency (TCP, HTTP or command probe) at a fixed interval
//! - Runs a verification stage once the dependency is ready
//! - Launches the main workload only if verification passed
//!
//! plus the ungated export job that shares the gate's connection settings.

pub mod config;
pub mod error;
pub mod export;
pub mod fakes;
pub mod gate;
pub mod obs;
pub mod probe;
pub mod report;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use config::{ConnectionTarget, GateConfig, ProbeKind};
pub use error::{GateError, ProbeError, Result};
pub use export::{ExportConfig, ExportJob, ExportReport};
pub use gate::{
    GateOutcome, GateResult, Launcher, ProcessLauncher, ProcessVerifier, ReadinessReport,
    ReadinessState, StartupGate, VerificationReport, Verifier, EXIT_CONFIG_ERROR,
    EXIT_LAUNCH_FAILED, EXIT_NOT_READY, EXIT_VERIFICATION_FAILED,
};
pub use obs::GateSpan;
pub use probe::{build_probe, CommandProbe, HttpProbe, ReadinessProbe, TcpProbe};
pub use report::GateReport;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{StageResult, StageRunner};
pub use stage::{OutputMode, StageConfig};
pub use telemetry::init_tracing;

/// readygate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
