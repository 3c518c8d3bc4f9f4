//! Configuration parsing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("unrecognized node {node} in section {section}")]
    UnknownNode { section: String, node: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("node {node} requires an argument")]
    MissingArgument { node: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
