//! Coding-task pipeline core
//!
//! This library provides:
//! - Error classification and bounded retry with cancellable backoff
//! - Message sources: an in-memory simulated queue and an HTTP-backed live queue
//! - Build / lint / test verification gates run as external commands
//! - Generation orchestration: model fallback plus a two-pass verify-and-fix loop
//!
//! # Flow
//!
//! ```text
//! MessageSource::receive
//!   → RetryPolicy::execute(
//!       clone → GenerationOrchestrator::run_with_verification → push/PR)
//!   → report → MessageSource::delete
//! ```
//!
//! Every blocking point (queue wait, retry backoff, subprocess) races a shared
//! [`tokio_util::sync::CancellationToken`].

#![allow(clippy::uninlined_format_args)]

pub mod generation;
pub mod process;
pub mod queue;
pub mod resilience;
pub mod verifier;

pub use generation::{
    AiderCli, GenerationError, GenerationOrchestrator, GenerationSummary, GenerationTool,
    GeneratorConfig, ModelSpec,
};
pub use queue::{
    build_source, AckToken, MessageSource, QueueConfig, QueueError, SimulatedSource, TaskMessage,
};
pub use resilience::{ClassifiedError, ErrorKind, RetryOutcome, RetryPolicy};
pub use verifier::{Stage, StageChecker, Verifier, VerifierConfig};
