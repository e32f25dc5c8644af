//! On-demand export job.
//!
//! Runs an export command once, outside the readiness gate, with the
//! dependency's connection variables and a designated output directory.
//! There is no retry: the command's exit code is the job's exit code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::fs;
use tracing::warn;

use crate::config::{ConnectionTarget, ENV_EXPORT_DIR};
use crate::error::{GateError, Result};
use crate::gate::{Launcher, ProcessLauncher};
use crate::obs;
use crate::stage::StageConfig;

/// Configuration of one export invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    pub target: ConnectionTarget,
    pub output_dir: PathBuf,
    pub command: StageConfig,
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.command.command.is_empty() {
            return Err(GateError::InvalidConfig(
                "export command is empty".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(GateError::InvalidConfig(
                "export output directory is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportReport {
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Files under the output directory created or modified by the run,
    /// sorted.
    pub files: Vec<PathBuf>,
}

impl ExportReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One-shot export runner.
pub struct ExportJob {
    config: ExportConfig,
    launcher: Arc<dyn Launcher>,
}

impl ExportJob {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            launcher: Arc::new(ProcessLauncher),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// The stage handed to the launcher, with connection and output
    /// variables set.
    pub fn stage(&self) -> StageConfig {
        self.config
            .command
            .clone()
            .with_envs(self.config.target.env_vars())
            .with_env(
                ENV_EXPORT_DIR,
                self.config.output_dir.to_string_lossy().to_string(),
            )
    }

    pub async fn run(&self) -> Result<ExportReport> {
        self.config.validate()?;
        prepare_output_dir(&self.config.output_dir).await?;

        let before = snapshot(&self.config.output_dir).await?;
        let started = Instant::now();
        let exit_code = self.launcher.launch(&self.stage()).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        // The command already ran; a listing failure only loses the file list.
        let mut files: Vec<PathBuf> = match snapshot(&self.config.output_dir).await {
            Ok(after) => after
                .into_iter()
                .filter(|(path, modified)| before.get(path) != Some(modified))
                .map(|(path, _)| path)
                .collect(),
            Err(e) => {
                warn!(
                    dir = %self.config.output_dir.display(),
                    error = %e,
                    "Could not list export output"
                );
                Vec::new()
            }
        };
        files.sort();

        obs::emit_export_finished(
            &self.config.output_dir.to_string_lossy(),
            exit_code,
            files.len(),
        );

        Ok(ExportReport {
            exit_code,
            duration_ms,
            files,
        })
    }
}

/// Create the directory if missing; reject non-directories.
async fn prepare_output_dir(dir: &Path) -> Result<()> {
    let export_dir_error = |reason: String| GateError::ExportDir {
        path: dir.to_path_buf(),
        reason,
    };
    match fs::metadata(dir).await {
        Ok(meta) if !meta.is_dir() => {
            Err(export_dir_error("exists and is not a directory".to_string()))
        }
        Ok(_) => Ok(()),
        Err(_) => fs::create_dir_all(dir)
            .await
            .map_err(|e| export_dir_error(e.to_string())),
    }
}

/// Regular files under `dir` with their modification times.
async fn snapshot(dir: &Path) -> Result<HashMap<PathBuf, Option<SystemTime>>> {
    let mut files = HashMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let modified = entry.metadata().await?.modified().ok();
                files.insert(entry.path(), modified);
            }
        }
    }
    Ok(files)
}
