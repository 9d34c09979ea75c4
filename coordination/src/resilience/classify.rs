//! Transient / permanent classification of errors and diagnostic output.
//!
//! | Kind       | Retriable | Source                                          |
//! |------------|-----------|-------------------------------------------------|
//! | Transient  | yes       | network, availability, rate limit, HTTP 5xx     |
//! | Permanent  | no        | tool logic failure, fix-loop exhaustion, 4xx    |
//! | Timeout    | no        | deadline hit inside the current retry loop      |
//!
//! Cancellation is not a kind: it is surfaced as [`ClassifiedError::Cancelled`]
//! so callers can tell a shutdown apart from both transient and permanent
//! failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification used by the retry loop to decide whether to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary failure, worth another attempt after backoff.
    Transient,
    /// Failure that will repeat on every attempt.
    Permanent,
    /// Deadline exceeded; terminal for the current retry loop.
    Timeout,
}

impl ErrorKind {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Lower-cased substrings that mark diagnostic output as transient.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "rate limit",
    "503",
    "502",
    "500",
    "temporarily unavailable",
    "try again later",
];

/// Classify a block of diagnostic output (git, gh, HTTP bodies).
///
/// Case-insensitive substring match against known transient signatures;
/// anything unrecognised is permanent.
pub fn classify_diagnostic_text(output: &str) -> ErrorKind {
    let lowered = output.to_lowercase();
    if TRANSIENT_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Classify an HTTP status code: 429 and 5xx are transient, everything else
/// (including success codes, which should never reach here) is permanent.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Permanent,
    }
}

/// Error carried across the retry boundary, tagged with its classification.
#[derive(Debug, Error)]
pub enum ClassifiedError {
    // ── Retriable ─────────────────────────────────────────────────────────
    #[error("transient error: {0:#}")]
    Transient(anyhow::Error),

    /// A plain, unclassified failure. Retried by default.
    #[error("{0:#}")]
    Unclassified(anyhow::Error),

    // ── Terminal ──────────────────────────────────────────────────────────
    #[error("permanent error: {0:#}")]
    Permanent(anyhow::Error),

    #[error("timed out: {0:#}")]
    Timeout(anyhow::Error),

    /// Shutdown was requested while the operation or its backoff was pending.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ClassifiedError {
    pub fn transient(cause: impl Into<anyhow::Error>) -> Self {
        Self::Transient(cause.into())
    }

    pub fn permanent(cause: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(cause.into())
    }

    pub fn timeout(cause: impl Into<anyhow::Error>) -> Self {
        Self::Timeout(cause.into())
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Tag `cause` with an already-computed kind.
    pub fn from_kind(kind: ErrorKind, cause: anyhow::Error) -> Self {
        match kind {
            ErrorKind::Transient => Self::Transient(cause),
            ErrorKind::Permanent => Self::Permanent(cause),
            ErrorKind::Timeout => Self::Timeout(cause),
        }
    }

    /// The classification tag, if any. `Unclassified` and `Cancelled` have none.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Transient(_) => Some(ErrorKind::Transient),
            Self::Permanent(_) => Some(ErrorKind::Permanent),
            Self::Timeout(_) => Some(ErrorKind::Timeout),
            Self::Unclassified(_) | Self::Cancelled(_) => None,
        }
    }

    /// Returns `true` if the retry loop may attempt the operation again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unclassified(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The wrapped cause, if this is not a cancellation.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Transient(e) | Self::Unclassified(e) | Self::Permanent(e) | Self::Timeout(e) => {
                Some(e)
            }
            Self::Cancelled(_) => None,
        }
    }

    /// Add context to the wrapped cause, keeping the classification.
    pub fn context<C>(self, context: C) -> Self
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        match self {
            Self::Transient(e) => Self::Transient(e.context(context)),
            Self::Unclassified(e) => Self::Unclassified(e.context(context)),
            Self::Permanent(e) => Self::Permanent(e.context(context)),
            Self::Timeout(e) => Self::Timeout(e.context(context)),
            Self::Cancelled(reason) => Self::Cancelled(reason),
        }
    }
}

impl From<anyhow::Error> for ClassifiedError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unclassified(err)
    }
}

/// Tag a failed result using the diagnostic output that accompanied it.
///
/// A successful result passes through untouched.
pub fn wrap_with_classification<T>(
    result: Result<T, anyhow::Error>,
    output: &str,
) -> Result<T, ClassifiedError> {
    result.map_err(|err| ClassifiedError::from_kind(classify_diagnostic_text(output), err))
}
