//! Cache manager errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key {0:?} not found")]
    NotFound(String),

    #[error("cache entry {0:?} is invalid (stale source or missing artifact)")]
    Invalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
