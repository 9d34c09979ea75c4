//! Verifier Module: deterministic build, lint and test gates
//!
//! The verifier is the only judge of whether generated code is acceptable.
//! Gates are external commands run in the task's working directory; a
//! non-zero exit fails the gate regardless of what it printed.
//!
//! # Pipeline
//!
//! ```text
//! build → lint → test
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::verifier::{run_pipeline, Stage, Verifier, VerifierConfig};
//!
//! let verifier = Verifier::new(VerifierConfig::default());
//! let report = run_pipeline(&verifier, &Stage::ALL, work_dir, &cancel).await?;
//! println!("Gates passed: {}/{}", report.gates_passed, report.gates_total);
//! ```

pub mod pipeline;
pub mod report;

pub use pipeline::{
    parse_command_line, run_pipeline, InvalidCommand, StageChecker, VerificationCancelled,
    Verifier, VerifierConfig,
};
pub use report::{GateOutcome, GateResult, Stage, VerifierReport};
