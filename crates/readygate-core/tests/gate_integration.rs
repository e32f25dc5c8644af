//! Integration tests for the startup gate with real probes and processes.

use readygate_core::fakes::{RecordingLauncher, ScriptedProbe, StaticVerifier};
use readygate_core::{
    ConnectionTarget, GateConfig, GateError, GateOutcome, ProbeKind, RetryPolicy, StageConfig,
    StartupGate, EXIT_VERIFICATION_FAILED,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn sh(name: &str, script: String) -> StageConfig {
    StageConfig::new(name, vec!["sh".into(), "-c".into(), script])
}

fn marker_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Test: listening dependency, passing verification, workload runs once
#[tokio::test]
async fn test_gate_launches_workload_after_verification() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("launched");

    let config = GateConfig::tcp(ConnectionTarget::new("127.0.0.1", port))
        .with_policy(RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(20))
        .with_verify(sh("verify", "exit 0".into()))
        .with_workload(sh(
            "app",
            format!(
                "echo \"$DB_HOST:$DB_PORT\" >> {}; exit 9",
                marker.display()
            ),
        ));

    let gate = StartupGate::from_config(&config).expect("valid config");
    let outcome = gate.run().await.expect("gate failed");

    assert!(outcome.launched(), "workload should launch");
    assert_eq!(outcome.exit_code(), 9, "workload exit code propagates");
    assert_eq!(marker_lines(&marker), vec![format!("127.0.0.1:{port}")]);
}

/// Test: failing verification keeps the workload from starting
#[tokio::test]
async fn test_gate_blocks_workload_on_failed_verification() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("launched");

    let config = GateConfig::tcp(ConnectionTarget::new("127.0.0.1", port))
        .with_policy(RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(20))
        .with_verify(sh("verify", "echo 'tests failed' >&2; exit 3".into()))
        .with_workload(sh("app", format!("touch {}", marker.display())));

    let gate = StartupGate::from_config(&config).expect("valid config");
    let outcome = gate.run().await.expect("gate failed");

    match &outcome {
        GateOutcome::VerificationFailed { verification, .. } => {
            let stage = verification.stage.as_ref().expect("stage ran");
            assert_eq!(stage.exit_code, 3);
            assert!(stage.stderr.contains("tests failed"));
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), EXIT_VERIFICATION_FAILED);
    assert!(!marker.exists(), "workload must not start");
}

/// Test: command probe waits until the dependency signals readiness
#[tokio::test]
async fn test_command_probe_waits_for_dependency() {
    let tmp = tempfile::tempdir().unwrap();
    let ready_file = tmp.path().join("ready");

    let config = GateConfig::tcp(ConnectionTarget::new("db", 5432))
        .with_probe(ProbeKind::Command {
            command: vec![
                "test".into(),
                "-f".into(),
                ready_file.to_string_lossy().to_string(),
            ],
        })
        .with_policy(RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(200));

    let gate = StartupGate::from_config(&config).expect("valid config");

    let flag = ready_file.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(flag, "").unwrap();
    });

    let report = gate.wait_ready().await.expect("dependency should become ready");
    assert!(report.attempts > 1, "first probes should fail");
}

/// Test: unreachable dependency with a bounded policy gives up
#[tokio::test]
async fn test_unreachable_dependency_exhausts_policy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = GateConfig::tcp(ConnectionTarget::new("127.0.0.1", port))
        .with_policy(RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(3));

    let gate = StartupGate::from_config(&config).expect("valid config");
    let err = gate.run().await.unwrap_err();
    assert!(matches!(err, GateError::ReadinessExhausted { attempts: 3, .. }));
}

/// Test: 3 failed probes, 1 successful probe, then verification and launch
#[tokio::test(start_paused = true)]
async fn test_scenario_three_failed_probes_then_verify() {
    let probe = Arc::new(ScriptedProbe::failing_times(3));
    let verifier = Arc::new(StaticVerifier::passing());
    let launcher = Arc::new(RecordingLauncher::exiting_with(0));
    let workload = StageConfig::new(
        "app",
        vec!["./start-app".into(), "--port".into(), "8000".into()],
    );

    let gate = StartupGate::new(probe.clone(), RetryPolicy::fixed(Duration::from_secs(1)))
        .with_verification(verifier.clone(), StageConfig::new("verify", vec!["pytest".into()]))
        .with_workload(launcher.clone(), workload.clone());

    let outcome = gate.run().await.expect("gate failed");

    assert_eq!(probe.calls(), 4, "3 failed probes + 1 successful probe");
    assert_eq!(outcome.readiness().attempts, 4);
    assert_eq!(outcome.readiness().elapsed_ms, 3_000);
    assert_eq!(verifier.calls(), 1);
    assert_eq!(launcher.launched(), vec![workload]);
}
