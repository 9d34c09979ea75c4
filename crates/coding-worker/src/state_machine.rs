//! Worker State Machine: explicit states and legal transition guards.
//!
//! ```text
//! Idle → Receiving → Processing → Reporting → Idle
//!          │            │
//!          └→ Idle      └→ Idle   (no message / task abandoned on shutdown)
//!
//! any non-terminal state → Stopped
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recent transitions kept for diagnostics.
const TRANSITION_LOG_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Between tasks.
    Idle,
    /// Waiting on the message source.
    Receiving,
    /// Running a task under the retry policy.
    Processing,
    /// Posting the outcome and deleting the message.
    Reporting,
    /// Shutdown observed. Terminal.
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Receiving => write!(f, "Receiving"),
            Self::Processing => write!(f, "Processing"),
            Self::Reporting => write!(f, "Reporting"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

fn is_legal_transition(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;

    if to == Stopped && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Receiving)
            | (Receiving, Idle)
            | (Receiving, Processing)
            | (Processing, Reporting)
            | (Processing, Idle)
            | (Reporting, Idle)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkerState,
    pub to: WorkerState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Error)]
#[error("Illegal state transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: WorkerState,
    pub to: WorkerState,
}

pub struct StateMachine {
    current: WorkerState,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
    total_transitions: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: WorkerState::Idle,
            created_at: Instant::now(),
            transitions: VecDeque::with_capacity(TRANSITION_LOG_CAPACITY),
            total_transitions: 0,
        }
    }

    pub fn current(&self) -> WorkerState {
        self.current
    }

    pub fn advance(
        &mut self,
        to: WorkerState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "State transition");

        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.total_transitions += 1;
        self.current = to;
        Ok(())
    }

    /// Move to `Stopped`. Always legal from non-terminal states.
    pub fn stop(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkerState::Stopped, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// The most recent transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    pub fn total_transitions(&self) -> u64 {
        self.total_transitions
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
