//! The external code-generation tool.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::process::{run_captured, truncate_output, ProcessError};

use super::{GenerationError, GeneratorConfig, ModelSpec};

/// Tool output kept in failure messages.
const FAILURE_OUTPUT_MAX_BYTES: usize = 4096;

/// A successful tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub model: String,
    pub output: String,
    pub duration: Duration,
}

/// Invokes the generation tool once, in `work_dir`, with one model.
#[async_trait]
pub trait GenerationTool: Send + Sync {
    async fn invoke(
        &self,
        work_dir: &Path,
        model: &ModelSpec,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolRun, GenerationError>;
}

/// Aider driven from the command line.
#[derive(Debug, Clone)]
pub struct AiderCli {
    bin_path: String,
    map_tokens: u32,
}

impl AiderCli {
    pub fn new(bin_path: impl Into<String>, map_tokens: u32) -> Self {
        Self {
            bin_path: bin_path.into(),
            map_tokens,
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.bin_path.clone(), config.map_tokens)
    }

    pub fn command_args(&self, model: &ModelSpec, prompt: &str) -> Vec<String> {
        vec![
            "--model".to_string(),
            model.name.clone(),
            "--yes".to_string(),
            "--no-auto-lint".to_string(),
            "--map-tokens".to_string(),
            self.map_tokens.to_string(),
            "--message".to_string(),
            prompt.to_string(),
        ]
    }

    /// Run `<bin> --version`; returns the reported version.
    pub async fn check_installation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let mut cmd = Command::new(&self.bin_path);
        cmd.arg("--version");
        let output = run_captured(&mut cmd, Some(Duration::from_secs(30)), cancel)
            .await
            .map_err(GenerationError::Launch)?;
        if !output.success {
            return Err(GenerationError::ToolFailed {
                model: String::new(),
                status: output.status_label(),
                output: truncate_output(&output.combined(), FAILURE_OUTPUT_MAX_BYTES),
            });
        }
        let version = output.combined().trim().to_string();
        info!(bin = %self.bin_path, %version, "Generation tool installation verified");
        Ok(version)
    }
}

#[async_trait]
impl GenerationTool for AiderCli {
    async fn invoke(
        &self,
        work_dir: &Path,
        model: &ModelSpec,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolRun, GenerationError> {
        let mut cmd = Command::new(&self.bin_path);
        cmd.args(self.command_args(model, prompt)).current_dir(work_dir);

        let output = match run_captured(&mut cmd, Some(model.timeout()), cancel).await {
            Ok(output) => output,
            Err(ProcessError::TimedOut { timeout, .. }) => {
                return Err(GenerationError::ModelTimeout {
                    model: model.name.clone(),
                    timeout,
                })
            }
            Err(ProcessError::Cancelled { .. }) => return Err(GenerationError::Cancelled),
            Err(e) => return Err(GenerationError::Launch(e)),
        };

        if !output.success {
            error!(
                model = %model.name,
                status = %output.status_label(),
                output = %truncate_output(&output.combined(), FAILURE_OUTPUT_MAX_BYTES),
                "Generation tool failed"
            );
            return Err(GenerationError::ToolFailed {
                model: model.name.clone(),
                status: output.status_label(),
                output: truncate_output(&output.combined(), FAILURE_OUTPUT_MAX_BYTES),
            });
        }

        Ok(ToolRun {
            model: model.name.clone(),
            output: output.combined(),
            duration: output.duration,
        })
    }
}
