//! Stash storage errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StashError {
    #[error("stash {0:?} not found")]
    NotFound(String),

    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StashResult<T> = std::result::Result<T, StashError>;
