//! Message Source: where task messages come from.
//!
//! [`MessageSource`] has two implementations:
//!
//! - [`SimulatedSource`]: bounded in-memory FIFO with long-poll receive and
//!   manual injection. Used for local runs and tests.
//! - [`HttpQueueSource`]: live backend over an HTTP queue service.
//!
//! Both honour the same contract: `receive` returns `Ok(Some(msg))`,
//! `Ok(None)` when the wait time elapses, or `Err(QueueError::Cancelled)`
//! when the shared cancellation token fires first.

pub mod http;
pub mod message;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resilience::{classify_http_status, ErrorKind};

pub use http::HttpQueueSource;
pub use message::{AckToken, TaskMessage, LABEL_DONE, LABEL_FAILED, LABEL_TRIGGER};
pub use simulated::SimulatedSource;

/// Default buffer size of the simulated backend.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Which backend a source talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Simulated,
    Live,
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("receive cancelled")]
    Cancelled,

    #[error("simulated queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("inject is only available on the simulated source")]
    NotSimulated,

    #[error("queue channel closed")]
    Closed,

    #[error("invalid task message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("queue service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid queue url `{0}`")]
    InvalidUrl(String),
}

impl QueueError {
    /// Retry classification. `Cancelled` has none.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Cancelled => None,
            // Body decode failures come back as transport errors too.
            Self::Transport(e) if e.is_decode() => Some(ErrorKind::Permanent),
            Self::Transport(_) => Some(ErrorKind::Transient),
            Self::Status { status, .. } => Some(classify_http_status(*status)),
            Self::Full { .. }
            | Self::NotSimulated
            | Self::Closed
            | Self::InvalidMessage(_)
            | Self::InvalidUrl(_) => Some(ErrorKind::Permanent),
        }
    }
}

/// A task queue.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn mode(&self) -> SourceMode;

    /// Wait up to the configured wait time for the next message.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<TaskMessage>, QueueError>;

    /// Acknowledge a message so it is not redelivered.
    async fn delete(&self, token: &AckToken) -> Result<(), QueueError>;

    /// Buffer a message for a later `receive`. Simulated backend only.
    async fn inject(&self, _message: TaskMessage) -> Result<(), QueueError> {
        Err(QueueError::NotSimulated)
    }

    async fn inject_json(&self, json: &str) -> Result<(), QueueError> {
        let message = TaskMessage::from_json(json)?;
        self.inject(message).await
    }

    /// Messages currently buffered. Informational; live backends report 0.
    fn queue_depth(&self) -> usize {
        0
    }
}

fn default_wait_time_seconds() -> u64 {
    20
}

fn default_visibility_timeout_seconds() -> u64 {
    3600
}

fn default_use_mock() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// `[queue]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base URL of the live queue service.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: u64,
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
    #[serde(default = "default_use_mock")]
    pub use_mock: bool,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            wait_time_seconds: default_wait_time_seconds(),
            visibility_timeout_seconds: default_visibility_timeout_seconds(),
            use_mock: default_use_mock(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Build the source selected by `config`.
pub fn build_source(config: &QueueConfig) -> Result<Arc<dyn MessageSource>, QueueError> {
    if config.use_mock {
        return Ok(Arc::new(SimulatedSource::from_config(config)));
    }
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| QueueError::InvalidUrl(String::new()))?;
    Ok(Arc::new(HttpQueueSource::from_config(url, config)?))
}
