//! Readiness probes.
//!
//! A probe answers one question: can the dependency take requests right
//! now? Every attempt is bounded by the policy's probe timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::{ConnectionTarget, GateConfig, ProbeKind};
use crate::error::{GateError, ProbeError, Result};
use crate::runner::StageRunner;
use crate::stage::StageConfig;

/// A single readiness check against an external dependency.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// What is being probed, for log lines.
    fn describe(&self) -> String;

    /// One attempt. `Ok(())` means ready.
    async fn probe(&self) -> std::result::Result<(), ProbeError>;
}

/// Ready once a TCP connection can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: ConnectionTarget,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: ConnectionTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn describe(&self) -> String {
        self.target.address()
    }

    async fn probe(&self) -> std::result::Result<(), ProbeError> {
        let address = self.target.address();
        match tokio::time::timeout(self.timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Unreachable {
                target: address,
                reason: e.to_string(),
            }),
            Err(_elapsed) => Err(ProbeError::Timeout {
                target: address,
                limit_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Ready once a GET answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // Dependencies sit on the private network; never route through a proxy.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| GateError::InvalidConfig(format!("http probe client: {e}")))?;
        Ok(Self {
            url: url.into(),
            timeout,
            client,
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn probe(&self) -> std::result::Result<(), ProbeError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout {
                    target: self.url.clone(),
                    limit_ms: self.timeout.as_millis() as u64,
                }
            } else {
                ProbeError::Unreachable {
                    target: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::UnhealthyStatus {
                target: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

/// Ready once an external command (e.g. `pg_isready`) exits 0.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    stage: StageConfig,
}

impl CommandProbe {
    /// The probe command's own timeout is rounded up to whole seconds.
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        let timeout_secs = timeout.as_millis().div_ceil(1000).max(1) as u64;
        Self {
            stage: StageConfig::new("probe", command).with_timeout_secs(timeout_secs),
        }
    }

    /// Environment passed to the probe command.
    pub fn with_envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.stage = self.stage.with_envs(vars);
        self
    }
}

#[async_trait]
impl ReadinessProbe for CommandProbe {
    fn describe(&self) -> String {
        self.stage.display_command()
    }

    async fn probe(&self) -> std::result::Result<(), ProbeError> {
        let target = self.describe();
        match StageRunner::execute_stage(&self.stage).await {
            Ok(result) if result.passed() => Ok(()),
            Ok(result) => Err(ProbeError::CommandFailed {
                target,
                exit_code: result.exit_code,
            }),
            Err(GateError::StageTimeout { timeout_secs, .. }) => Err(ProbeError::Timeout {
                target,
                limit_ms: timeout_secs * 1000,
            }),
            Err(e) => Err(ProbeError::Unreachable {
                target,
                reason: e.to_string(),
            }),
        }
    }
}

/// Build the probe a validated [`GateConfig`] asks for.
pub fn build_probe(config: &GateConfig) -> Result<Arc<dyn ReadinessProbe>> {
    let timeout = config.policy.probe_timeout();
    match &config.probe {
        ProbeKind::Tcp => {
            let target = config.target.clone().ok_or_else(|| {
                GateError::InvalidConfig("tcp probe needs a dependency host and port".into())
            })?;
            Ok(Arc::new(TcpProbe::new(target, timeout)))
        }
        ProbeKind::Http { url } => Ok(Arc::new(HttpProbe::new(url.clone(), timeout)?)),
        ProbeKind::Command { command } => {
            let mut probe = CommandProbe::new(command.clone(), timeout);
            if let Some(target) = &config.target {
                probe = probe.with_envs(target.env_vars());
            }
            Ok(Arc::new(probe))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    /// Answer every connection with a fixed HTTP status line.
    async fn serve_status(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn test_tcp_probe_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new(
            ConnectionTarget::new("127.0.0.1", port),
            Duration::from_secs(1),
        );
        assert!(probe.probe().await.is_ok());
        assert_eq!(probe.describe(), format!("127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn test_tcp_probe_fails_on_closed_port() {
        let port = closed_port().await;
        let probe = TcpProbe::new(
            ConnectionTarget::new("127.0.0.1", port),
            Duration::from_secs(1),
        );
        let err = probe.probe().await.unwrap_err();
        assert!(matches!(err, ProbeError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_http_probe_ready_on_200() {
        let url = serve_status("200 OK").await;
        let probe = HttpProbe::new(url, Duration::from_secs(2)).unwrap();
        assert!(probe.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_fails_on_503() {
        let url = serve_status("503 Service Unavailable").await;
        let probe = HttpProbe::new(url, Duration::from_secs(2)).unwrap();
        match probe.probe().await {
            Err(ProbeError::UnhealthyStatus { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected UnhealthyStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_probe_times_out_on_silent_server() {
        // Accept connections and hold them open without answering.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = HttpProbe::new(format!("http://{addr}/health"), Duration::from_millis(200))
            .unwrap();
        match probe.probe().await {
            Err(ProbeError::Timeout { limit_ms, .. }) => assert_eq!(limit_ms, 200),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_probe_times_out() {
        let probe = CommandProbe::new(
            vec!["sleep".into(), "5".into()],
            Duration::from_secs(1),
        );
        assert!(matches!(
            probe.probe().await,
            Err(ProbeError::Timeout { limit_ms: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_command_probe_follows_exit_code() {
        let ok = CommandProbe::new(vec!["true".into()], Duration::from_secs(2));
        assert!(ok.probe().await.is_ok());

        let failing = CommandProbe::new(vec!["false".into()], Duration::from_secs(2));
        assert!(matches!(
            failing.probe().await,
            Err(ProbeError::CommandFailed { exit_code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_command_probe_sees_target_env() {
        let probe = CommandProbe::new(
            vec![
                "sh".into(),
                "-c".into(),
                "test \"$DB_HOST:$DB_PORT\" = db:5432".into(),
            ],
            Duration::from_secs(2),
        )
        .with_envs(ConnectionTarget::new("db", 5432).env_vars());
        assert!(probe.probe().await.is_ok());
    }

    #[test]
    fn test_build_probe_describes_each_kind() {
        let target = ConnectionTarget::new("db", 5432);
        let tcp = build_probe(&GateConfig::tcp(target.clone())).unwrap();
        assert_eq!(tcp.describe(), "db:5432");

        let cmd = build_probe(&GateConfig::tcp(target).with_probe(ProbeKind::Command {
            command: vec!["pg_isready".into(), "-h".into(), "db".into()],
        }))
        .unwrap();
        assert_eq!(cmd.describe(), "pg_isready -h db");
    }
}
