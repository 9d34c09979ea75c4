//! Task message wire format.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label that marks an issue as work for the worker.
pub const LABEL_TRIGGER: &str = "ai-task";
/// Label applied by the producer after a terminal failure.
pub const LABEL_FAILED: &str = "ai-task-failed";
/// Label applied by the producer after a merged change.
pub const LABEL_DONE: &str = "ai-task-done";

/// Opaque handle used to delete a received message. Never serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A coding task derived from an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub issue_number: u64,
    /// `owner/name`
    pub repository: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub ack_token: AckToken,
}

impl TaskMessage {
    /// New message carrying the trigger label, stamped now.
    pub fn new(
        repository: impl Into<String>,
        issue_number: u64,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            issue_number,
            repository: repository.into(),
            title: title.into(),
            body: body.into(),
            labels: vec![LABEL_TRIGGER.to_string()],
            created_at: Some(Utc::now()),
            ack_token: AckToken::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Content equality, ignoring the acknowledgment token.
    pub fn same_content(&self, other: &Self) -> bool {
        self.issue_number == other.issue_number
            && self.repository == other.repository
            && self.title == other.title
            && self.body == other.body
            && self.labels == other.labels
            && self.created_at == other.created_at
    }
}
