//! Generation failure taxonomy.
//!
//! | Variant                 | Classified as |
//! |-------------------------|---------------|
//! | ModelTimeout (anywhere) | Transient     |
//! | Cancelled (anywhere)    | Cancelled     |
//! | everything else         | Permanent     |

use std::time::Duration;

use anyhow::anyhow;
use thiserror::Error;

use crate::process::ProcessError;
use crate::resilience::ClassifiedError;
use crate::verifier::Stage;

use super::orchestrator::Pass;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model {model} timed out after {timeout:?}")]
    ModelTimeout { model: String, timeout: Duration },

    #[error("all models timed out: {last}")]
    AllModelsTimedOut { last: Box<GenerationError> },

    #[error("generation tool failed using {model} ({status}): {output}")]
    ToolFailed {
        model: String,
        status: String,
        output: String,
    },

    #[error("could not launch generation tool: {0}")]
    Launch(ProcessError),

    #[error("generation cancelled")]
    Cancelled,

    #[error("no generation models configured")]
    NoModels,

    #[error("{stage} failed after {attempts} fix attempts: {diagnostic}")]
    VerificationExhausted {
        stage: Stage,
        attempts: u32,
        diagnostic: String,
    },

    #[error("fix attempt failed: {cause}")]
    FixAttempt { cause: Box<GenerationError> },

    #[error("pass {pass} failed: {cause}")]
    PassFailed {
        pass: Pass,
        cause: Box<GenerationError>,
    },
}

impl GenerationError {
    /// A deadline was hit somewhere in this failure's chain.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ModelTimeout { .. } | Self::AllModelsTimedOut { .. } => true,
            Self::FixAttempt { cause } | Self::PassFailed { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::FixAttempt { cause } | Self::PassFailed { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }

    /// Tag for the retry boundary. Timeouts can succeed on a fresh clone;
    /// anything the fix loop could not repair will fail the same way again.
    pub fn into_classified(self) -> ClassifiedError {
        if self.is_cancelled() {
            return ClassifiedError::cancelled(self.to_string());
        }
        if self.is_timeout() {
            ClassifiedError::transient(anyhow!(self).context("generation tool timed out"))
        } else {
            ClassifiedError::permanent(anyhow!(self).context("generation failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ErrorKind;

    fn timeout() -> GenerationError {
        GenerationError::ModelTimeout {
            model: "small".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_nested_timeout_is_transient() {
        let err = GenerationError::PassFailed {
            pass: Pass::Implementation,
            cause: Box::new(GenerationError::FixAttempt {
                cause: Box::new(GenerationError::AllModelsTimedOut {
                    last: Box::new(timeout()),
                }),
            }),
        };
        assert!(err.is_timeout());
        let classified = err.into_classified();
        assert_eq!(classified.kind(), Some(ErrorKind::Transient));
        assert!(classified.to_string().contains("all models timed out"));
    }

    #[test]
    fn test_exhaustion_is_permanent() {
        let err = GenerationError::PassFailed {
            pass: Pass::TestCreation,
            cause: Box::new(GenerationError::VerificationExhausted {
                stage: Stage::Test,
                attempts: 3,
                diagnostic: "go test ./... failed:\nFAIL pkg".into(),
            }),
        };
        assert!(!err.is_timeout());
        let classified = err.into_classified();
        assert_eq!(classified.kind(), Some(ErrorKind::Permanent));
        assert!(classified.to_string().contains("FAIL pkg"));
    }

    #[test]
    fn test_cancellation_survives_wrapping() {
        let err = GenerationError::PassFailed {
            pass: Pass::Implementation,
            cause: Box::new(GenerationError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(err.into_classified().is_cancelled());
    }
}
