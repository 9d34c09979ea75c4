//! Verifier Pipeline: sequential execution of the build, lint and test gates
//!
//! Each stage is a list of command lines run in the working directory. The
//! first non-zero exit fails the stage; a spawn failure or gate timeout counts
//! as a stage failure too. Cancellation is the only way a check does not
//! produce a [`GateResult`].

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::process::{run_captured, truncate_output, ProcessError};
use crate::verifier::report::{GateResult, Stage, VerifierReport};

/// Raised when a gate is interrupted by shutdown.
#[derive(Debug, Error)]
#[error("verification of {stage} cancelled")]
pub struct VerificationCancelled {
    pub stage: Stage,
}

/// A command line that does not split into words.
#[derive(Debug, Error)]
#[error("{stage} command `{line}` could not be parsed")]
pub struct InvalidCommand {
    pub stage: Stage,
    pub line: String,
}

fn default_build() -> Vec<String> {
    vec!["go build ./...".to_string()]
}

fn default_lint() -> Vec<String> {
    vec!["go fmt ./...".to_string(), "go vet ./...".to_string()]
}

fn default_test() -> Vec<String> {
    vec!["go test ./...".to_string()]
}

fn default_gate_timeout_secs() -> u64 {
    600
}

fn default_output_max_bytes() -> usize {
    8192
}

/// Configuration for the Verifier pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_build")]
    pub build: Vec<String>,
    #[serde(default = "default_lint")]
    pub lint: Vec<String>,
    #[serde(default = "default_test")]
    pub test: Vec<String>,
    /// Maximum time per command (seconds)
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
    /// Truncate combined output to this many bytes
    #[serde(default = "default_output_max_bytes")]
    pub output_max_bytes: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            build: default_build(),
            lint: default_lint(),
            test: default_test(),
            gate_timeout_secs: default_gate_timeout_secs(),
            output_max_bytes: default_output_max_bytes(),
        }
    }
}

impl VerifierConfig {
    pub fn commands(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Build => &self.build,
            Stage::Lint => &self.lint,
            Stage::Test => &self.test,
        }
    }

    /// Check that every configured command line splits into words.
    pub fn validate(&self) -> Result<(), InvalidCommand> {
        for stage in Stage::ALL {
            for line in self.commands(stage) {
                if parse_command_line(line).is_none() {
                    return Err(InvalidCommand {
                        stage,
                        line: line.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Split a shell-style command line. `None` for unbalanced quotes or blank lines.
pub fn parse_command_line(line: &str) -> Option<Vec<String>> {
    shlex::split(line).filter(|words| !words.is_empty())
}

/// Seam between the generation loop and the gates it checks.
#[async_trait]
pub trait StageChecker: Send + Sync {
    async fn check(
        &self,
        stage: Stage,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<GateResult, VerificationCancelled>;
}

/// Runs the configured commands as quality gates.
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    async fn run_command(
        &self,
        stage: Stage,
        line: &str,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<GateResult>, VerificationCancelled> {
        let start = Instant::now();
        let Some(words) = parse_command_line(line) else {
            return Ok(Some(GateResult::failed(
                stage,
                start.elapsed(),
                line,
                None,
                "could not parse command line",
            )));
        };

        let mut cmd = tokio::process::Command::new(&words[0]);
        cmd.args(&words[1..]).current_dir(work_dir);
        let timeout = Duration::from_secs(self.config.gate_timeout_secs);

        match run_captured(&mut cmd, Some(timeout), cancel).await {
            Ok(output) if output.success => Ok(None),
            Ok(output) => {
                let combined = truncate_output(&output.combined(), self.config.output_max_bytes);
                warn!(
                    %stage,
                    command = line,
                    status = %output.status_label(),
                    "Gate command failed"
                );
                Ok(Some(GateResult::failed(
                    stage,
                    start.elapsed(),
                    line,
                    output.exit_code,
                    combined,
                )))
            }
            Err(ProcessError::Cancelled { .. }) => Err(VerificationCancelled { stage }),
            Err(e) => {
                warn!(%stage, command = line, error = %e, "Gate command did not complete");
                Ok(Some(GateResult::failed(
                    stage,
                    start.elapsed(),
                    line,
                    None,
                    e.to_string(),
                )))
            }
        }
    }
}

#[async_trait]
impl StageChecker for Verifier {
    async fn check(
        &self,
        stage: Stage,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<GateResult, VerificationCancelled> {
        let start = Instant::now();
        for line in self.config.commands(stage) {
            if let Some(failure) = self.run_command(stage, line, work_dir, cancel).await? {
                return Ok(failure);
            }
        }
        info!(%stage, elapsed_ms = start.elapsed().as_millis() as u64, "Gate passed");
        Ok(GateResult::passed(stage, start.elapsed()))
    }
}

/// Run `stages` in order, stopping at the first failure.
pub async fn run_pipeline(
    checker: &dyn StageChecker,
    stages: &[Stage],
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<VerifierReport, VerificationCancelled> {
    let start = Instant::now();
    let mut report = VerifierReport::new(work_dir.display().to_string());

    for &stage in stages {
        let result = checker.check(stage, work_dir, cancel).await?;
        let failed = !result.is_passed();
        report.add_gate(result);
        if failed {
            break;
        }
    }

    report.finalize(start.elapsed());
    info!(summary = %report.summary(), "Verification finished");
    Ok(report)
}
