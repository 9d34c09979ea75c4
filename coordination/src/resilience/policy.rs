//! Bounded retry with cancellable backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::classify::ClassifiedError;

/// Retries granted after the first attempt when no policy is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between attempts for the default (fixed-delay) policy.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Retry configuration. Constructed explicitly by each caller; there is no
/// process-wide default that callers could silently disagree on.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied after each delay. `1.0` gives fixed delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF)
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            multiplier,
        }
    }

    /// Same delay between every attempt.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(max_retries, delay, delay, 1.0)
    }

    /// Delay grows by `multiplier` after each attempt, capped at `max_backoff`.
    pub fn exponential(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        Self::new(max_retries, initial_backoff, max_backoff, multiplier)
    }

    /// Total number of times the operation may be invoked.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay that follows `current`, clamped to `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.multiplier;
        Duration::try_from_secs_f64(scaled)
            .map_or(self.max_backoff, |next| next.min(self.max_backoff))
    }

    /// Run `operation` until it succeeds, fails with a non-retriable error,
    /// exhausts the attempt budget, or `cancel` fires during a backoff wait.
    ///
    /// The outcome reflects the final state only: a success after earlier
    /// failures carries no error.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let max_attempts = self.max_attempts();
        let mut backoff = self.initial_backoff.min(self.max_backoff);
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        attempts: attempt,
                        result: Ok(value),
                    }
                }
                Err(err) => err,
            };

            if !err.is_retriable() {
                warn!(attempt, error = %err, "Non-retriable error, not retrying");
                return RetryOutcome {
                    attempts: attempt,
                    result: Err(err),
                };
            }

            if attempt >= max_attempts {
                error!(attempts = attempt, error = %err, "Max retries exceeded");
                return RetryOutcome {
                    attempts: attempt,
                    result: Err(err),
                };
            }

            warn!(
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return RetryOutcome {
                        attempts: attempt,
                        result: Err(ClassifiedError::cancelled(
                            "shutdown requested during retry backoff",
                        )),
                    };
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = self.next_backoff(backoff);
            attempt += 1;
        }
    }
}

/// Result of one [`RetryPolicy::execute`] run.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Attempts consumed: 1 on first-try success, up to `max_retries + 1`.
    pub attempts: u32,
    /// Final value, or the error that ended the loop.
    pub result: Result<T, ClassifiedError>,
}

impl<T> RetryOutcome<T> {
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.result.as_ref().err()
    }

    /// Whether the loop ended because the attempt budget of `policy` ran out.
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.result.is_err() && self.attempts >= policy.max_attempts()
    }

    pub fn into_result(self) -> Result<T, ClassifiedError> {
        self.result
    }
}
