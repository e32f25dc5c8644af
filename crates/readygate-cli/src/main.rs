//! readygate - readiness-gated container entrypoint
//!
//! ## Commands
//!
//! - `run`: wait for the dependency, verify, then launch the workload
//! - `wait`: wait for the dependency and exit
//! - `check`: probe once (container health checks)
//! - `export`: run the export job, ungated

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use readygate_core::config::{ENV_DB_HOST, ENV_DB_PORT};
use readygate_core::retry::{DEFAULT_INTERVAL_MS, DEFAULT_PROBE_TIMEOUT_MS};
use readygate_core::{
    init_tracing, ConnectionTarget, ExportConfig, ExportJob, GateConfig, GateError, GateReport,
    GateSpan, ProbeKind, RetryPolicy, StageConfig, StartupGate, EXIT_CONFIG_ERROR,
    EXIT_LAUNCH_FAILED, EXIT_NOT_READY,
};

#[derive(Parser)]
#[command(name = "readygate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Wait for a dependency, verify, then start the workload", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the dependency, run the verification step, then the workload
    ///
    /// Example: readygate run --verify pytest -q -- python main.py
    Run {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Verification command (skipped when absent); ends at ';' or '--'
        #[arg(long, num_args = 1.., value_terminator = ";", allow_hyphen_values = true)]
        verify: Vec<String>,

        /// Verification timeout in seconds (0 = none)
        #[arg(long, env = "GATE_VERIFY_TIMEOUT_SECS", default_value_t = 0)]
        verify_timeout_secs: u64,

        /// Write a JSON report of the run to this path
        #[arg(long, env = "GATE_REPORT")]
        report: Option<PathBuf>,

        /// Workload command, after '--'
        #[arg(last = true)]
        workload: Vec<String>,
    },

    /// Wait for the dependency and exit
    Wait {
        #[command(flatten)]
        probe: ProbeArgs,
    },

    /// Probe the dependency once
    Check {
        #[command(flatten)]
        probe: ProbeArgs,
    },

    /// Run the export job (not gated on readiness)
    Export {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory the export writes into
        #[arg(long, env = "EXPORT_DIR")]
        output_dir: PathBuf,

        /// Export command
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct TargetArgs {
    /// Dependency host
    #[arg(long, env = "DB_HOST")]
    host: Option<String>,

    /// Dependency port
    #[arg(long, env = "DB_PORT")]
    port: Option<u16>,
}

impl TargetArgs {
    /// `None` when neither host nor port is given; a half-filled target is
    /// kept so validation can name the missing half.
    fn target(&self) -> Option<ConnectionTarget> {
        match (&self.host, self.port) {
            (None, None) => None,
            (host, port) => Some(ConnectionTarget::new(
                host.clone().unwrap_or_default(),
                port.unwrap_or(0),
            )),
        }
    }

    fn required_target(&self) -> Result<ConnectionTarget, GateError> {
        let target = self.target().ok_or_else(|| {
            GateError::InvalidConfig(format!(
                "dependency host and port are required (set {ENV_DB_HOST}/{ENV_DB_PORT} or --host/--port)"
            ))
        })?;
        target.validate()?;
        Ok(target)
    }
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Probe an HTTP endpoint (2xx = ready) instead of a TCP port
    #[arg(long, env = "GATE_HTTP_URL", conflicts_with = "probe_cmd")]
    http_url: Option<String>,

    /// Probe with a command that exits 0 when ready, terminated by ';'
    #[arg(long, num_args = 1.., value_terminator = ";", allow_hyphen_values = true)]
    probe_cmd: Vec<String>,

    /// Pause between probe attempts in milliseconds
    #[arg(long, env = "GATE_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    interval_ms: u64,

    /// Give up after this many attempts (default: never)
    #[arg(long, env = "GATE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Give up after this many seconds (default: never)
    #[arg(long, env = "GATE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Bound on a single probe attempt in milliseconds
    #[arg(long, env = "GATE_PROBE_TIMEOUT_MS", default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    probe_timeout_ms: u64,
}

impl ProbeArgs {
    fn policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::fixed(Duration::from_millis(self.interval_ms))
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms));
        if let Some(max) = self.max_attempts {
            policy = policy.with_max_attempts(max);
        }
        if let Some(secs) = self.timeout_secs {
            policy = policy.with_timeout(Duration::from_secs(secs));
        }
        policy
    }

    fn probe_kind(&self) -> ProbeKind {
        if let Some(url) = &self.http_url {
            ProbeKind::Http { url: url.clone() }
        } else if !self.probe_cmd.is_empty() {
            ProbeKind::Command {
                command: self.probe_cmd.clone(),
            }
        } else {
            ProbeKind::Tcp
        }
    }

    fn gate_config(&self) -> GateConfig {
        GateConfig {
            target: self.target.target(),
            probe: self.probe_kind(),
            policy: self.policy(),
            verify: None,
            workload: None,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            probe,
            verify,
            verify_timeout_secs,
            report,
            workload,
        } => cmd_run(&probe, verify, verify_timeout_secs, report, workload).await,
        Commands::Wait { probe } => cmd_wait(&probe).await,
        Commands::Check { probe } => cmd_check(&probe).await,
        Commands::Export {
            target,
            output_dir,
            command,
        } => cmd_export(&target, output_dir, command).await,
    };

    match result {
        Ok(code) => to_exit_code(code),
        Err(e) => {
            error!("{:#}", e);
            to_exit_code(exit_code_for(&e))
        }
    }
}

/// Wait, verify, launch
async fn cmd_run(
    probe: &ProbeArgs,
    verify: Vec<String>,
    verify_timeout_secs: u64,
    report_path: Option<PathBuf>,
    workload: Vec<String>,
) -> Result<i32> {
    let (verify, workload) = split_workload(verify, workload)?;
    let mut config = probe
        .gate_config()
        .with_workload(StageConfig::new("workload", workload));
    if !verify.is_empty() {
        config = config.with_verify(
            StageConfig::new("verify", verify)
                .with_timeout_secs(verify_timeout_secs)
                .inherit_output(),
        );
    }

    let gate = StartupGate::from_config(&config)?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let _span = GateSpan::enter(&run_id.to_string());

    let result = gate.run().await;

    if let Some(path) = &report_path {
        let report = match &result {
            Ok(outcome) => GateReport::from_outcome(run_id, started_at, outcome),
            Err(e) => GateReport::from_error(
                run_id,
                started_at,
                config.describe_target(),
                e,
                gate_exit_code(e),
            ),
        };
        if let Err(e) = report.write_json(path) {
            warn!(path = %path.display(), error = %e, "Failed to write gate report");
        }
    }

    let outcome = result.context("startup gate aborted")?;
    Ok(outcome.exit_code())
}

/// Wait for readiness only
async fn cmd_wait(probe: &ProbeArgs) -> Result<i32> {
    let gate = StartupGate::from_config(&probe.gate_config())?;
    let report = gate
        .wait_ready()
        .await
        .context("dependency did not become ready")?;
    info!(
        attempts = report.attempts,
        elapsed_ms = report.elapsed_ms,
        "Ready"
    );
    Ok(0)
}

/// Single probe
async fn cmd_check(probe: &ProbeArgs) -> Result<i32> {
    let config = probe.gate_config();
    let gate = StartupGate::from_config(&config)?;
    match gate.check().await {
        Ok(()) => {
            info!(dependency = %config.describe_target(), "Ready");
            Ok(0)
        }
        Err(e) => {
            warn!(dependency = %config.describe_target(), error = %e, "Not ready");
            Ok(1)
        }
    }
}

/// Run the export job
async fn cmd_export(
    target: &TargetArgs,
    output_dir: PathBuf,
    command: Vec<String>,
) -> Result<i32> {
    let config = ExportConfig {
        target: target.required_target()?,
        output_dir,
        command: StageConfig::new("export", command),
    };

    let report = ExportJob::new(config)
        .run()
        .await
        .context("export job failed to run")?;

    for file in &report.files {
        info!(file = %file.display(), "Exported");
    }
    if !report.success() {
        warn!(exit_code = report.exit_code, "Export command failed");
    }
    Ok(report.exit_code)
}

/// `--verify` swallows a following `--` together with the workload; split
/// them apart again.
fn split_workload(
    mut verify: Vec<String>,
    mut workload: Vec<String>,
) -> Result<(Vec<String>, Vec<String>), GateError> {
    if workload.is_empty() {
        if let Some(pos) = verify.iter().position(|arg| arg == "--") {
            workload = verify.split_off(pos + 1);
            verify.truncate(pos);
        }
    }
    if workload.is_empty() {
        return Err(GateError::InvalidConfig(
            "no workload command given (usage: readygate run [--verify CMD...] -- WORKLOAD...)"
                .to_string(),
        ));
    }
    Ok((verify, workload))
}

fn gate_exit_code(err: &GateError) -> i32 {
    match err {
        GateError::InvalidConfig(_) => EXIT_CONFIG_ERROR,
        GateError::ReadinessExhausted { .. } | GateError::ReadinessTimedOut { .. } => {
            EXIT_NOT_READY
        }
        GateError::Launch { .. } => EXIT_LAUNCH_FAILED,
        _ => 1,
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GateError>())
        .map(gate_exit_code)
        .unwrap_or(1)
}

/// Exit codes outside 0..=255 become a generic failure.
fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
