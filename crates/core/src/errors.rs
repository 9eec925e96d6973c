use thiserror::Error;

use crate::domain::procurement::ProcurementId;
use crate::workflow::states::TransitionError;

/// The procurement error taxonomy. Only transient I/O is retryable; business
/// rule failures surface immediately or drive the workflow to its Error
/// terminal with a specific message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProcurementError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("No vendors available for procurement {0}")]
    NoVendors(ProcurementId),
    #[error("no quotes available for procurement {0}")]
    NoQuotes(ProcurementId),
    #[error("negotiation deadline passed for procurement {0}")]
    DeadlinePassed(ProcurementId),
    #[error("transient i/o failure: {0}")]
    TransientIo(String),
    #[error("authorization failed for user `{user}` in org `{org}`")]
    Authorization { user: String, org: String },
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl ProcurementError {
    /// Retryable errors re-run the failed node from its last checkpoint;
    /// everything else halts or surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}
