// src/strategy/cli.rs
// Fallback: run the workflow through the engine's command-line runner and pick the
// output file up from disk. Accepts both graph encodings.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::ExecutionStrategy;
use crate::config::GatewayConfig;
use crate::error::OrchestratorError;
use crate::graph::Workflow;

/// Extra time the runner gets beyond its own `--timeout` before it is killed
const KILL_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CliStrategy {
    command: Vec<String>,
    output_dir: PathBuf,
}

impl CliStrategy {
    pub fn new(command: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.cli_command.clone(), config.output_dir.clone())
    }

    pub async fn run_via_cli(
        &self,
        workflow: &Workflow,
        timeout: Duration,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let Some((program, base_args)) = self.command.split_first() else {
            return Err(OrchestratorError::CliExecutionFailed {
                exit_code: None,
                stdout: String::new(),
                stderr: "no CLI command configured".to_string(),
            });
        };

        let prefix = workflow.output_prefix();

        // Removed when dropped at the end of this call
        let graph_file = tempfile::Builder::new()
            .prefix("workflow-")
            .suffix(".json")
            .tempfile()?;
        let body = serde_json::to_vec(&workflow.to_json().map_err(std::io::Error::from)?)
            .map_err(std::io::Error::from)?;
        tokio::fs::write(graph_file.path(), body).await?;

        tracing::info!(
            "🛠️ Running workflow via CLI ({:?}, prefix '{}'): {}",
            workflow.encoding(),
            prefix,
            graph_file.path().display()
        );

        let mut command = Command::new(program);
        command
            .args(base_args)
            .arg("run")
            .arg("--workflow")
            .arg(graph_file.path())
            .arg("--wait")
            .arg("--timeout")
            .arg(timeout.as_secs().max(1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let kill_after = timeout.saturating_add(KILL_GRACE);
        let output = match tokio::time::timeout(kill_after, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(OrchestratorError::CliExecutionFailed {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Failed to execute {}: {}", program, e),
                });
            }
            Err(_) => {
                return Err(OrchestratorError::CliExecutionFailed {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("CLI run killed after {:?}", kill_after),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            tracing::error!("CLI run failed ({}): {}", output.status, stderr);
            return Err(OrchestratorError::CliExecutionFailed {
                exit_code: output.status.code(),
                stdout,
                stderr,
            });
        }
        tracing::debug!("CLI run output: {}", stdout);

        let path = find_output_file(&self.output_dir, &prefix)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NoArtifactProduced(format!(
                    "no file starting with '{}' in {}",
                    prefix,
                    self.output_dir.display()
                ))
            })?;

        let bytes = tokio::fs::read(&path).await?;
        if bytes.is_empty() {
            return Err(OrchestratorError::NoArtifactProduced(format!(
                "{} is empty",
                path.display()
            )));
        }

        tracing::info!("📦 CLI run produced {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes)
    }
}

#[async_trait]
impl ExecutionStrategy for CliStrategy {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn execute(&self, workflow: &Workflow, timeout: Duration) -> Result<Vec<u8>, OrchestratorError> {
        self.run_via_cli(workflow, timeout).await
    }
}

/// First regular file (by name) under `output_dir` whose name starts with `prefix`.
/// A prefix like `videos/clip` searches `output_dir/videos` for `clip*`.
pub async fn find_output_file(output_dir: &Path, prefix: &str) -> std::io::Result<Option<PathBuf>> {
    let (dir, name_prefix) = match prefix.rsplit_once('/') {
        Some((subfolder, name)) => (output_dir.join(subfolder), name),
        None => (output_dir.to_path_buf(), prefix),
    };

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with(name_prefix) && entry.file_type().await?.is_file() {
            matches.push(entry.path());
        }
    }

    matches.sort();
    Ok(matches.into_iter().next())
}
