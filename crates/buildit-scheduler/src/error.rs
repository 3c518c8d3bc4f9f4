//! Errors surfaced by the fault-tolerance envelope and scheduling layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("circuit breaker open, rejecting call")]
    CircuitOpen,

    #[error("bulkhead saturated, rejecting call after waiting for a permit")]
    BulkheadRejected,

    #[error("system overload: {reason}")]
    SystemOverload { reason: String },

    #[error(transparent)]
    Core(#[from] buildit_core::Error),
}

impl SchedulerError {
    /// Whether the retry policy should attempt another try for this error
    /// (§4.10 "non-retryable errors... abort immediately").
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::CircuitOpen | SchedulerError::BulkheadRejected => false,
            SchedulerError::SystemOverload { .. } => true,
            SchedulerError::Core(e) => e.is_retryable(),
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
