//! In-memory message source.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AckToken, MessageSource, QueueConfig, QueueError, SourceMode, TaskMessage};

/// Bounded FIFO with long-poll receive.
///
/// One producer (`inject`) and one consumer (`receive`) may run concurrently.
/// The receiver sits behind an async mutex, so a second concurrent `receive`
/// waits its turn instead of observing the same message.
pub struct SimulatedSource {
    tx: mpsc::Sender<TaskMessage>,
    rx: Mutex<mpsc::Receiver<TaskMessage>>,
    capacity: usize,
    wait_time: Duration,
}

impl SimulatedSource {
    pub fn new(capacity: usize, wait_time: Duration) -> Self {
        // mpsc::channel panics on zero capacity.
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            wait_time,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.buffer_capacity,
            Duration::from_secs(config.wait_time_seconds),
        )
    }
}

#[async_trait]
impl MessageSource for SimulatedSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Simulated
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<TaskMessage>, QueueError> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            guard = self.rx.lock() => guard,
        };

        if let Ok(message) = rx.try_recv() {
            return Ok(Some(message));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            message = rx.recv() => match message {
                Some(message) => Ok(Some(message)),
                None => Err(QueueError::Closed),
            },
            _ = tokio::time::sleep(self.wait_time) => Ok(None),
        }
    }

    async fn delete(&self, token: &AckToken) -> Result<(), QueueError> {
        debug!(ack_token = %token, "Simulated delete");
        Ok(())
    }

    async fn inject(&self, mut message: TaskMessage) -> Result<(), QueueError> {
        if message.ack_token.is_empty() {
            message.ack_token =
                AckToken::new(format!("sim-{}-{}", message.issue_number, Uuid::new_v4()));
        }
        if message.created_at.is_none() {
            message.created_at = Some(Utc::now());
        }

        let issue_number = message.issue_number;
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;

        info!(issue_number, depth = self.queue_depth(), "Injected task message");
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}
