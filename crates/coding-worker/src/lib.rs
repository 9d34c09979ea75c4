//! Queue-driven coding worker.
//!
//! Pulls task messages from a [`coordination::MessageSource`], runs the
//! generation pipeline in a fresh clone, and reports through a
//! [`github_bridge::VcsClient`].

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod github_bridge;
pub mod state_machine;
pub mod worker;

pub use config::WorkerConfig;
pub use github_bridge::{GhCliBridge, GithubConfig, IssueOutcome, VcsClient};
pub use state_machine::{IllegalTransition, StateMachine, WorkerState};
pub use worker::{failure_comment, TaskOutcome, Worker, WorkerStats};
