//! Live message source over an HTTP queue service.
//!
//! ```text
//! GET    {base}/messages?wait_time_seconds=W&visibility_timeout=V
//!          200 {"receipt_handle": "...", "message": {TaskMessage}}
//!          204 no message within W seconds
//! DELETE {base}/messages/{receipt_handle}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AckToken, MessageSource, QueueConfig, QueueError, SourceMode, TaskMessage};

/// Extra time granted to the HTTP client beyond the long-poll wait.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ReceivedEnvelope {
    receipt_handle: String,
    message: TaskMessage,
}

pub struct HttpQueueSource {
    client: reqwest::Client,
    base: Url,
    wait_time_seconds: u64,
    visibility_timeout_seconds: u64,
}

impl HttpQueueSource {
    pub fn new(
        base_url: &str,
        wait_time_seconds: u64,
        visibility_timeout_seconds: u64,
    ) -> Result<Self, QueueError> {
        let base = Url::parse(base_url).map_err(|_| QueueError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(QueueError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(wait_time_seconds) + REQUEST_SLACK)
            .build()?;

        Ok(Self {
            client,
            base,
            wait_time_seconds,
            visibility_timeout_seconds,
        })
    }

    pub fn from_config(base_url: &str, config: &QueueConfig) -> Result<Self, QueueError> {
        Self::new(
            base_url,
            config.wait_time_seconds,
            config.visibility_timeout_seconds,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, QueueError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| QueueError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn receive_url(&self) -> Result<Url, QueueError> {
        let mut url = self.endpoint(&["messages"])?;
        url.query_pairs_mut()
            .append_pair("wait_time_seconds", &self.wait_time_seconds.to_string())
            .append_pair(
                "visibility_timeout",
                &self.visibility_timeout_seconds.to_string(),
            );
        Ok(url)
    }

    fn delete_url(&self, token: &AckToken) -> Result<Url, QueueError> {
        self.endpoint(&["messages", token.as_str()])
    }

    async fn status_error(response: reqwest::Response) -> QueueError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        QueueError::Status { status, body }
    }

    async fn fetch(&self) -> Result<Option<TaskMessage>, QueueError> {
        let response = self.client.get(self.receive_url()?).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let envelope: ReceivedEnvelope = response.json().await?;
        let mut message = envelope.message;
        message.ack_token = AckToken::new(envelope.receipt_handle);
        debug!(issue_number = message.issue_number, "Received task message");
        Ok(Some(message))
    }
}

#[async_trait]
impl MessageSource for HttpQueueSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Live
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<TaskMessage>, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            result = self.fetch() => result,
        }
    }

    async fn delete(&self, token: &AckToken) -> Result<(), QueueError> {
        let response = self.client.delete(self.delete_url(token)?).send().await?;
        // Already gone counts as deleted.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(Self::status_error(response).await);
        }
        info!(ack_token = %token, "Deleted message from queue");
        Ok(())
    }
}
