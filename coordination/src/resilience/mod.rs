//! Resilience: failure classification and bounded retry
//!
//! Errors that cross the retry boundary are carried as [`ClassifiedError`],
//! an explicit tagged union, so the retry loop never has to inspect an error's
//! runtime capabilities to decide whether another attempt is worthwhile.
//!
//! ```text
//! operation()
//!   ├─ Ok                         → RetryOutcome { attempts, Ok(value) }
//!   ├─ Err(Transient|Unclassified) → backoff (cancellable) → next attempt
//!   └─ Err(Permanent|Timeout|Cancelled) → RetryOutcome { attempts, Err(e) }
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::resilience::{ClassifiedError, RetryPolicy};
//!
//! let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
//! let outcome = policy.execute(&cancel, || push_branch()).await;
//! if let Some(err) = outcome.last_error() {
//!     warn!(attempts = outcome.attempts, error = %err, "push failed");
//! }
//! ```

pub mod classify;
pub mod policy;

pub use classify::{
    classify_diagnostic_text, classify_http_status, wrap_with_classification, ClassifiedError,
    ErrorKind,
};
pub use policy::{RetryOutcome, RetryPolicy};
