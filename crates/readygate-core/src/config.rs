//! Gate configuration.
//!
//! Everything the gate needs is carried in [`GateConfig`] and checked by
//! [`GateConfig::validate`] before any probe runs. The CLI fills it from
//! flags with environment fallbacks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GateError, Result};
use crate::retry::RetryPolicy;
use crate::stage::StageConfig;

/// Environment variable carrying the dependency host.
pub const ENV_DB_HOST: &str = "DB_HOST";
/// Environment variable carrying the dependency port.
pub const ENV_DB_PORT: &str = "DB_PORT";
/// Environment variable carrying the export output directory.
pub const ENV_EXPORT_DIR: &str = "EXPORT_DIR";

/// Host and port of the dependency the gate waits on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, as handed to the socket layer.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GateError::InvalidConfig(format!(
                "dependency host is empty (set {ENV_DB_HOST} or --host)"
            )));
        }
        if self.port == 0 {
            return Err(GateError::InvalidConfig(format!(
                "dependency port must be in 1..=65535 (set {ENV_DB_PORT} or --port)"
            )));
        }
        Ok(())
    }

    /// Variables exported to child processes.
    pub fn env_vars(&self) -> [(String, String); 2] {
        [
            (ENV_DB_HOST.to_string(), self.host.clone()),
            (ENV_DB_PORT.to_string(), self.port.to_string()),
        ]
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which readiness check the gate performs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect to the connection target.
    #[default]
    Tcp,
    /// HTTP GET that must answer 2xx.
    Http { url: String },
    /// External command that must exit 0.
    Command { command: Vec<String> },
}

impl ProbeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::Tcp => "tcp",
            ProbeKind::Http { .. } => "http",
            ProbeKind::Command { .. } => "command",
        }
    }
}

/// Full configuration of one gate invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfig {
    /// Dependency address. Required for TCP probes; exported to children
    /// whenever present.
    pub target: Option<ConnectionTarget>,

    pub probe: ProbeKind,

    pub policy: RetryPolicy,

    /// Verification stage run after readiness. `None` skips verification.
    pub verify: Option<StageConfig>,

    /// Main workload. `None` means wait (and verify) only.
    pub workload: Option<StageConfig>,
}

impl GateConfig {
    /// TCP gate against `target` with the default policy.
    pub fn tcp(target: ConnectionTarget) -> Self {
        Self {
            target: Some(target),
            probe: ProbeKind::Tcp,
            policy: RetryPolicy::default(),
            verify: None,
            workload: None,
        }
    }

    pub fn with_probe(mut self, probe: ProbeKind) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_verify(mut self, verify: StageConfig) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn with_workload(mut self, workload: StageConfig) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Human-readable name of what the gate waits on.
    pub fn describe_target(&self) -> String {
        match (&self.probe, &self.target) {
            (ProbeKind::Http { url }, _) => url.clone(),
            (ProbeKind::Command { command }, _) => command.join(" "),
            (ProbeKind::Tcp, Some(target)) => target.address(),
            (ProbeKind::Tcp, None) => "<unset>".to_string(),
        }
    }

    /// Check required fields. Called before the gate is built.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        if let Some(target) = &self.target {
            target.validate()?;
        }

        match &self.probe {
            ProbeKind::Tcp => {
                if self.target.is_none() {
                    return Err(GateError::InvalidConfig(format!(
                        "tcp probe needs a dependency host and port (set {ENV_DB_HOST}/{ENV_DB_PORT} or --host/--port)"
                    )));
                }
            }
            ProbeKind::Http { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(GateError::InvalidConfig(format!(
                        "http probe url must start with http:// or https://, got {url:?}"
                    )));
                }
            }
            ProbeKind::Command { command } => {
                if command.is_empty() {
                    return Err(GateError::InvalidConfig(
                        "command probe has an empty command".into(),
                    ));
                }
            }
        }

        for stage in self.verify.iter().chain(self.workload.iter()) {
            if stage.command.is_empty() {
                return Err(GateError::InvalidConfig(format!(
                    "stage {} has an empty command",
                    stage.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new("postgres", 5432)
    }

    #[test]
    fn test_target_address_and_env() {
        let t = target();
        assert_eq!(t.address(), "postgres:5432");
        assert_eq!(t.to_string(), "postgres:5432");
        let env = t.env_vars();
        assert_eq!(env[0], ("DB_HOST".to_string(), "postgres".to_string()));
        assert_eq!(env[1], ("DB_PORT".to_string(), "5432".to_string()));
    }

    #[test]
    fn test_target_validation() {
        assert!(target().validate().is_ok());
        assert!(ConnectionTarget::new("  ", 5432).validate().is_err());
        let err = ConnectionTarget::new("db", 0).validate().unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn test_tcp_requires_target() {
        let mut config = GateConfig::tcp(target());
        assert!(config.validate().is_ok());

        config.target = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DB_HOST"));
    }

    #[test]
    fn test_http_probe_without_target_is_valid() {
        let mut config = GateConfig::tcp(target()).with_probe(ProbeKind::Http {
            url: "http://api:8080/health".into(),
        });
        config.target = None;
        assert!(config.validate().is_ok());
        assert_eq!(config.describe_target(), "http://api:8080/health");
    }

    #[test]
    fn test_http_probe_rejects_bad_scheme() {
        let config = GateConfig::tcp(target()).with_probe(ProbeKind::Http {
            url: "api:8080/health".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_probe_rejects_empty_command() {
        let config =
            GateConfig::tcp(target()).with_probe(ProbeKind::Command { command: vec![] });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_workload_rejected() {
        let config = GateConfig::tcp(target()).with_workload(StageConfig::new("app", vec![]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("app"));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let config =
            GateConfig::tcp(target()).with_policy(RetryPolicy::fixed(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probe_kind_serde_tagged() {
        let json = serde_json::to_value(ProbeKind::Http {
            url: "http://x/health".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "http");
        assert_eq!(ProbeKind::default().name(), "tcp");
    }
}
