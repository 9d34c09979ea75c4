//! Verifier Report: structured output from the verification gates

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A verification stage, checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Lint,
    Test,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Build, Stage::Lint, Stage::Test];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Lint => write!(f, "lint"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Outcome of a single verification gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Passed,
    Failed,
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASS"),
            Self::Failed => write!(f, "FAIL"),
        }
    }
}

/// Result of a single verification gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub stage: Stage,
    pub outcome: GateOutcome,
    pub duration_ms: u64,
    /// Exit code of the failing command, `None` on timeout, spawn failure or signal
    pub exit_code: Option<i32>,
    /// The command line that produced `output`
    pub command: String,
    /// Combined stdout/stderr of the failing command (truncated)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl GateResult {
    pub fn passed(stage: Stage, duration: Duration) -> Self {
        Self {
            stage,
            outcome: GateOutcome::Passed,
            duration_ms: duration.as_millis() as u64,
            exit_code: Some(0),
            command: String::new(),
            output: String::new(),
        }
    }

    pub fn failed(
        stage: Stage,
        duration: Duration,
        command: impl Into<String>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            outcome: GateOutcome::Failed,
            duration_ms: duration.as_millis() as u64,
            exit_code,
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == GateOutcome::Passed
    }

    /// Diagnostic text embedded in fix prompts and failure notices.
    pub fn diagnostic(&self) -> String {
        let output = self.output.trim();
        if output.is_empty() {
            format!("{} failed", self.command)
        } else {
            format!("{} failed:\n{}", self.command, output)
        }
    }
}

/// Complete verification report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierReport {
    pub timestamp: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub gates_passed: usize,
    pub gates_total: usize,
    /// Whether every gate run passed
    pub all_green: bool,
    pub gates: Vec<GateResult>,
    /// First failing stage (for quick triage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<Stage>,
    pub working_dir: String,
}

impl VerifierReport {
    pub fn new(working_dir: String) -> Self {
        Self {
            timestamp: Utc::now(),
            total_duration_ms: 0,
            gates_passed: 0,
            gates_total: 0,
            all_green: false,
            gates: Vec::new(),
            first_failure: None,
            working_dir,
        }
    }

    pub fn add_gate(&mut self, result: GateResult) {
        if result.is_passed() {
            self.gates_passed += 1;
        } else if self.first_failure.is_none() {
            self.first_failure = Some(result.stage);
        }
        self.gates_total += 1;
        self.gates.push(result);
    }

    pub fn finalize(&mut self, total_duration: Duration) {
        self.total_duration_ms = total_duration.as_millis() as u64;
        self.all_green = self.gates_passed == self.gates_total && self.gates_total > 0;
    }

    /// The first failed gate, if any.
    pub fn failed_gate(&self) -> Option<&GateResult> {
        self.gates.iter().find(|g| !g.is_passed())
    }

    /// Get a compact summary for logging
    pub fn summary(&self) -> String {
        let gate_statuses: Vec<String> = self
            .gates
            .iter()
            .map(|g| format!("{}:{}", g.stage, g.outcome))
            .collect();

        format!(
            "[{}] {}/{} gates passed ({}ms) [{}]",
            if self.all_green { "GREEN" } else { "RED" },
            self.gates_passed,
            self.gates_total,
            self.total_duration_ms,
            gate_statuses.join(" → "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_outcome_display() {
        assert_eq!(GateOutcome::Passed.to_string(), "PASS");
        assert_eq!(GateOutcome::Failed.to_string(), "FAIL");
        assert_eq!(Stage::Lint.to_string(), "lint");
    }

    #[test]
    fn test_report_add_gate() {
        let mut report = VerifierReport::new("/tmp/work".into());
        report.add_gate(GateResult::passed(Stage::Build, Duration::from_millis(5)));
        report.add_gate(GateResult::failed(
            Stage::Lint,
            Duration::from_millis(7),
            "go vet ./...",
            Some(1),
            "main.go:3: unused variable\n",
        ));
        report.finalize(Duration::from_millis(12));

        assert_eq!(report.gates_passed, 1);
        assert_eq!(report.gates_total, 2);
        assert!(!report.all_green);
        assert_eq!(report.first_failure, Some(Stage::Lint));
        assert_eq!(report.failed_gate().unwrap().stage, Stage::Lint);
        assert_eq!(report.summary(), "[RED] 1/2 gates passed (12ms) [build:PASS → lint:FAIL]");
    }

    #[test]
    fn test_report_all_green() {
        let mut report = VerifierReport::new("/tmp/work".into());
        for stage in Stage::ALL {
            report.add_gate(GateResult::passed(stage, Duration::ZERO));
        }
        report.finalize(Duration::ZERO);
        assert!(report.all_green);
        assert!(report.failed_gate().is_none());
    }

    #[test]
    fn test_empty_report_is_not_green() {
        let mut report = VerifierReport::new(String::new());
        report.finalize(Duration::ZERO);
        assert!(!report.all_green);
    }

    #[test]
    fn test_diagnostic_names_command() {
        let gate = GateResult::failed(
            Stage::Build,
            Duration::ZERO,
            "go build ./...",
            Some(2),
            "\n./main.go:10: undefined: Foo\n\n",
        );
        assert_eq!(gate.diagnostic(), "go build ./... failed:\n./main.go:10: undefined: Foo");

        let silent = GateResult::failed(Stage::Test, Duration::ZERO, "go test ./...", Some(1), "");
        assert_eq!(silent.diagnostic(), "go test ./... failed");
    }
}
