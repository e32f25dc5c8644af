//! Stage execution.

use crate::error::{GateError, Result};
use crate::stage::{OutputMode, StageConfig};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout (empty when output is inherited).
    pub stdout: String,

    /// Captured stderr (empty when output is inherited).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// A failed result for a stage that never produced an exit status.
    pub fn not_run(stage_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: 0,
            success: false,
        }
    }
}

/// Executes stages as child processes.
pub struct StageRunner;

impl StageRunner {
    /// Execute a single stage and return the result.
    ///
    /// A non-zero exit is reported through [`StageResult`]; only an empty
    /// command, a spawn failure or an elapsed timeout are errors. The child
    /// is killed if the timeout elapses.
    pub async fn execute_stage(config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();
        let child = spawn(config)?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| GateError::StageTimeout {
                stage: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: exit_code_of(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }

    /// Run a long-lived stage in the foreground and return its exit code.
    ///
    /// Output is inherited. On Unix, SIGTERM, SIGINT and SIGHUP received by
    /// this process are relayed to the child, so a container stop reaches
    /// the workload even when readygate runs as PID 1.
    pub async fn supervise_stage(config: &StageConfig) -> Result<i32> {
        let config = config.clone().inherit_output();
        #[cfg(unix)]
        let mut relay = SignalRelay::install()?;
        let mut child = spawn(&config)?;

        #[cfg(unix)]
        let wait = relay.wait(&mut child);
        #[cfg(not(unix))]
        let wait = child.wait();

        let status = if config.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(config.timeout_secs), wait)
                .await
                .map_err(|_| GateError::StageTimeout {
                    stage: config.name.clone(),
                    timeout_secs: config.timeout_secs,
                })??
        } else {
            wait.await?
        };
        Ok(exit_code_of(&status))
    }
}

fn spawn(config: &StageConfig) -> Result<Child> {
    let (exe, args) = config
        .command
        .split_first()
        .ok_or_else(|| GateError::EmptyCommand {
            stage: config.name.clone(),
        })?;

    let mut cmd = Command::new(exe);
    cmd.args(args).envs(&config.env).kill_on_drop(true);
    match config.output {
        OutputMode::Capture => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        OutputMode::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }

    debug!(stage = %config.name, command = %config.display_command(), "Spawning stage");
    cmd.spawn().map_err(|source| GateError::Spawn {
        stage: config.name.clone(),
        source,
    })
}

/// Termination signals to pass through to a supervised child.
#[cfg(unix)]
struct SignalRelay {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalRelay {
    /// Handlers are registered before the child is spawned so no signal
    /// falls between spawn and wait.
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(&mut self, child: &mut Child) -> std::io::Result<ExitStatus> {
        loop {
            let signal = tokio::select! {
                status = child.wait() => return status,
                _ = self.terminate.recv() => libc::SIGTERM,
                _ = self.interrupt.recv() => libc::SIGINT,
                _ = self.hangup.recv() => libc::SIGHUP,
            };
            let Some(pid) = child.id() else {
                continue;
            };
            debug!(pid = pid, signal = signal, "Forwarding signal to child");
            // SAFETY: `pid` is our own child, which has not been reaped yet.
            if unsafe { libc::kill(pid as libc::pid_t, signal) } == -1 {
                warn!(
                    pid = pid,
                    signal = signal,
                    error = %std::io::Error::last_os_error(),
                    "Failed to forward signal"
                );
            }
        }
    }
}

/// Map an exit status to a shell-style exit code.
///
/// On Unix a signal-terminated child maps to `128 + signal`; anything else
/// without a code maps to -1.
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> StageConfig {
        StageConfig::new(name, vec!["sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn test_stage_result_passed() {
        let result = StageResult {
            stage_name: "verify".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_stage_result_failed() {
        let result = StageResult {
            stage_name: "verify".to_string(),
            exit_code: 1,
            stdout: "".to_string(),
            stderr: "error".to_string(),
            duration_ms: 100,
            success: false,
        };
        assert!(!result.passed());
    }

    #[test]
    fn test_not_run_is_failure() {
        let result = StageResult::not_run("verify", "no such file");
        assert!(!result.passed());
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stderr, "no such file");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let config = StageConfig::new("echo_test", vec!["echo".into(), "hello".into()]);

        let result = StageRunner::execute_stage(&config)
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let config = sh("exit_test", "exit 7");

        let result = StageRunner::execute_stage(&config)
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn test_env_is_passed_to_child() {
        let config = sh("env_test", "printf %s \"$DB_HOST\"").with_env("DB_HOST", "postgres");

        let result = StageRunner::execute_stage(&config)
            .await
            .expect("execute failed");
        assert_eq!(result.stdout, "postgres");
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let config = StageConfig::new("empty", vec![]);
        let err = StageRunner::execute_stage(&config).await.unwrap_err();
        assert!(matches!(err, GateError::EmptyCommand { .. }));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let config = StageConfig::new("missing", vec!["/nonexistent/readygate-bin".into()]);
        let err = StageRunner::execute_stage(&config).await.unwrap_err();
        assert!(matches!(err, GateError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let config = sh("slow", "sleep 5").with_timeout_secs(1);
        let err = StageRunner::execute_stage(&config).await.unwrap_err();
        assert!(matches!(err, GateError::StageTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_supervise_returns_exit_code() {
        let code = StageRunner::supervise_stage(&sh("app", "exit 5"))
            .await
            .expect("supervise failed");
        assert_eq!(code, 5);
    }

    #[tokio::test]
    async fn test_supervise_timeout_is_error() {
        let config = sh("app", "sleep 5").with_timeout_secs(1);
        let err = StageRunner::supervise_stage(&config).await.unwrap_err();
        assert!(matches!(err, GateError::StageTimeout { timeout_secs: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_exit_maps_to_128_plus_signal() {
        let config = sh("killed", "kill -9 $$");
        let result = StageRunner::execute_stage(&config)
            .await
            .expect("execute failed");
        assert_eq!(result.exit_code, 137);
    }
}
