//! Worker loop: receive → process under retry → report → delete.
//!
//! One task at a time. The report (log on success, issue comment on failure)
//! always precedes deletion, and deletion happens even if the comment could
//! not be posted, so a poisoned message is never redelivered forever. A task
//! whose retry loop was cut short by shutdown is neither reported nor
//! deleted; the queue redelivers it after its visibility timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use coordination::generation::GenerationOrchestrator;
use coordination::queue::{MessageSource, QueueError, TaskMessage};
use coordination::resilience::{ClassifiedError, RetryOutcome, RetryPolicy};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::github_bridge::{IssueOutcome, VcsClient};
use crate::state_machine::{StateMachine, WorkerState};

const DEFAULT_RECEIVE_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Interrupted by shutdown and left on the queue.
    pub abandoned: u64,
    pub receive_errors: u64,
}

/// Terminal result of one received task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { pr_url: String, attempts: u32 },
    Failed { attempts: u32, error: String },
    Abandoned { attempts: u32 },
}

pub struct Worker {
    source: Arc<dyn MessageSource>,
    generator: Arc<GenerationOrchestrator>,
    vcs: Arc<dyn VcsClient>,
    policy: RetryPolicy,
    receive_error_delay: Duration,
    worker_id: String,
    state: StateMachine,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        source: Arc<dyn MessageSource>,
        generator: Arc<GenerationOrchestrator>,
        vcs: Arc<dyn VcsClient>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            generator,
            vcs,
            policy,
            receive_error_delay: DEFAULT_RECEIVE_ERROR_DELAY,
            worker_id: "coding-worker".to_string(),
            state: StateMachine::new(),
            stats: WorkerStats::default(),
        }
    }

    pub fn with_receive_error_delay(mut self, delay: Duration) -> Self {
        self.receive_error_delay = delay;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state.current()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Process tasks until `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> WorkerStats {
        info!(worker_id = %self.worker_id, mode = %self.source.mode(), "Worker loop started");

        while !cancel.is_cancelled() {
            self.process_next(cancel).await;
        }

        if let Err(e) = self.state.stop("cancellation requested") {
            error!(error = %e, "Worker state machine rejected stop");
        }
        info!(
            worker_id = %self.worker_id,
            received = self.stats.received,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            abandoned = self.stats.abandoned,
            "Worker stopped"
        );
        self.stats
    }

    /// One receive, and if a message arrived, one full task cycle.
    pub async fn process_next(&mut self, cancel: &CancellationToken) -> Option<TaskOutcome> {
        self.transition(WorkerState::Receiving, "polling");

        let message = match self.source.receive(cancel).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("No message available");
                self.transition(WorkerState::Idle, "no message");
                return None;
            }
            Err(QueueError::Cancelled) => {
                self.transition(WorkerState::Idle, "receive cancelled");
                return None;
            }
            Err(e) => {
                self.stats.receive_errors += 1;
                error!(error = %e, kind = ?e.kind(), "Failed to receive message");
                self.transition(WorkerState::Idle, "receive failed");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.receive_error_delay) => {}
                }
                return None;
            }
        };

        self.stats.received += 1;
        info!(
            issue_number = message.issue_number,
            repository = %message.repository,
            title = %message.title,
            "Processing task"
        );
        self.transition(WorkerState::Processing, "message received");

        let outcome = self.execute_task(&message, cancel).await;
        Some(self.report(&message, outcome, cancel).await)
    }

    /// Run the task under the retry policy.
    async fn execute_task(
        &self,
        message: &TaskMessage,
        cancel: &CancellationToken,
    ) -> RetryOutcome<String> {
        self.policy
            .execute(cancel, || self.process_task(message, cancel))
            .await
    }

    /// One attempt: fresh clone, generate and verify, push and open a PR.
    async fn process_task(
        &self,
        message: &TaskMessage,
        cancel: &CancellationToken,
    ) -> Result<String, ClassifiedError> {
        let work_dir = self
            .vcs
            .clone_and_branch(&message.repository, message.issue_number, cancel)
            .await
            .map_err(|e| e.context("clone failed"))?;

        let result = self.generate_and_publish(&work_dir, message, cancel).await;
        remove_work_dir(&work_dir).await;
        result
    }

    async fn generate_and_publish(
        &self,
        work_dir: &Path,
        message: &TaskMessage,
        cancel: &CancellationToken,
    ) -> Result<String, ClassifiedError> {
        let summary = self
            .generator
            .run_with_verification(work_dir, &message.title, &message.body, cancel)
            .await
            .map_err(|e| e.into_classified())?;
        info!(
            issue_number = message.issue_number,
            implementation_attempts = summary.implementation.attempts,
            test_attempts = summary.tests.attempts,
            "Generation verified"
        );

        self.vcs
            .push_and_create_pr(work_dir, message, cancel)
            .await
            .map_err(|e| e.context("pr creation failed"))
    }

    async fn report(
        &mut self,
        message: &TaskMessage,
        outcome: RetryOutcome<String>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let attempts = outcome.attempts;
        let task_outcome = match outcome.result {
            Ok(pr_url) => {
                self.transition(WorkerState::Reporting, "task succeeded");
                info!(
                    issue_number = message.issue_number,
                    pr_url = %pr_url,
                    attempts,
                    "Task completed successfully"
                );
                self.label(message, IssueOutcome::Done, cancel).await;
                self.delete(message).await;
                self.stats.succeeded += 1;
                TaskOutcome::Succeeded { pr_url, attempts }
            }
            Err(err) if err.is_cancelled() => {
                warn!(
                    issue_number = message.issue_number,
                    attempts,
                    "Task interrupted by shutdown, leaving message for redelivery"
                );
                self.stats.abandoned += 1;
                TaskOutcome::Abandoned { attempts }
            }
            Err(err) => {
                self.transition(WorkerState::Reporting, "task failed");
                error!(
                    issue_number = message.issue_number,
                    attempts,
                    error = %err,
                    "Task failed after retries"
                );
                let comment = failure_comment(&err, attempts);
                if let Err(e) = self
                    .vcs
                    .add_comment(&message.repository, message.issue_number, &comment, cancel)
                    .await
                {
                    error!(issue_number = message.issue_number, error = %e, "Failed to post failure comment");
                }
                self.label(message, IssueOutcome::Failed, cancel).await;
                self.delete(message).await;
                self.stats.failed += 1;
                TaskOutcome::Failed {
                    attempts,
                    error: err.to_string(),
                }
            }
        };

        self.transition(WorkerState::Idle, "task finished");
        task_outcome
    }

    async fn label(&self, message: &TaskMessage, outcome: IssueOutcome, cancel: &CancellationToken) {
        if let Err(e) = self
            .vcs
            .label_issue(&message.repository, message.issue_number, outcome, cancel)
            .await
        {
            error!(issue_number = message.issue_number, ?outcome, error = %e, "Failed to label issue");
        }
    }

    async fn delete(&self, message: &TaskMessage) {
        match self.source.delete(&message.ack_token).await {
            Ok(()) => debug!(issue_number = message.issue_number, "Message deleted"),
            Err(e) => error!(
                issue_number = message.issue_number,
                error = %e,
                "Failed to delete message"
            ),
        }
    }

    fn transition(&mut self, to: WorkerState, reason: &str) {
        if let Err(e) = self.state.advance(to, Some(reason)) {
            error!(error = %e, "Worker state machine rejected transition");
        }
    }
}

async fn remove_work_dir(work_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
        debug!(work_dir = %work_dir.display(), error = %e, "Work dir not removed");
    }
}

/// Markdown notice posted to the originating issue after a terminal failure.
pub fn failure_comment(err: &ClassifiedError, attempts: u32) -> String {
    format!(
        "## Coding worker could not complete this task\n\n\
         **Attempts**: {attempts}\n\
         **Error**:\n\
         ```\n{err}\n```\n\n\
         ---\n\
         This comment was generated automatically by coding-worker.\n"
    )
}
