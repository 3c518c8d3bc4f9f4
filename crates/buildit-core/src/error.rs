//! Error types for the BuildIt pipeline engine.
//!
//! Variants map onto the error taxonomy in the engine design: some are
//! ordinary result-carrying errors, others exist only so call-sites can
//! classify a failure (`is_retryable`, `is_validation`) without
//! downcasting a string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A step's declared configuration is invalid. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A step's work failed (non-zero exit, I/O error, disallowed empty glob match).
    #[error("execution failed: {0}")]
    Execution(String),

    /// A deadline fired before the work completed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An ancestor or external caller requested the work stop.
    #[error("cancelled")]
    Cancelled,

    /// Circuit open, bulkhead saturation, or graceful-degradation rejection.
    #[error("system overload: {0}")]
    SystemOverload(String),

    /// An executor invariant was broken (e.g. no handler and no legacy fallback).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the fault-tolerance layer should attempt another attempt for this error.
    ///
    /// Validation, timeout, and cancellation are never retried (§7); system
    /// overload is retryable at the caller's discretion by default.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_) | Error::Timeout(_) | Error::Cancelled
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
