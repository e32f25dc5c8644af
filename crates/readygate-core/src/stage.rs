//! Command stage definitions.
//!
//! A stage is an argv vector plus the knobs the runner needs. Stages are
//! never composed from shell strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a stage's stdout/stderr is handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Pipe and collect output into the [`StageResult`](crate::runner::StageResult).
    #[default]
    Capture,

    /// Stream output straight to the parent's stdio.
    Inherit,
}

/// Configuration for a command stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,

    /// Output handling.
    #[serde(default)]
    pub output: OutputMode,

    /// Extra environment variables set on the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl StageConfig {
    /// Create a stage with captured output and no timeout.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs: 0,
            output: OutputMode::Capture,
            env: BTreeMap::new(),
        }
    }

    /// Set the timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Stream output to the parent instead of capturing it.
    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Add an environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables for the child.
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// The command rendered for log lines.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_config_new_defaults() {
        let config = StageConfig::new("verify", vec!["pytest".into(), "-q".into()]);
        assert_eq!(config.name, "verify");
        assert_eq!(config.timeout_secs, 0);
        assert_eq!(config.output, OutputMode::Capture);
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_stage_config_builders() {
        let config = StageConfig::new("app", vec!["python".into(), "main.py".into()])
            .with_timeout_secs(30)
            .inherit_output()
            .with_env("DB_HOST", "db")
            .with_envs([("DB_PORT", "5432")]);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.output, OutputMode::Inherit);
        assert_eq!(config.env.get("DB_HOST").map(String::as_str), Some("db"));
        assert_eq!(config.env.get("DB_PORT").map(String::as_str), Some("5432"));
    }

    #[test]
    fn test_display_command() {
        let config = StageConfig::new("app", vec!["python".into(), "main.py".into()]);
        assert_eq!(config.display_command(), "python main.py");
    }

    #[test]
    fn test_output_mode_defaults_when_absent() {
        let config: StageConfig = serde_json::from_str(
            r#"{"name":"t","command":["true"],"timeout_secs":0}"#,
        )
        .unwrap();
        assert_eq!(config.output, OutputMode::Capture);
        assert!(config.env.is_empty());
    }
}
