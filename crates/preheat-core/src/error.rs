//! Error types for config construction.

use thiserror::Error;

/// Result type alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building a [`crate::RunConfig`].
///
/// All of these are fatal setup failures: no run can start without a
/// valid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid request spec `{spec}`: {reason}")]
    InvalidRequest { spec: String, reason: String },

    #[error("invalid RPC method `{value}`: {reason}")]
    InvalidServiceMethod { value: String, reason: String },

    #[error("invalid duration `{0}` (expected e.g. 500ms, 5s, 2m)")]
    InvalidDuration(String),

    #[error("invalid header `{0}` (expected `Name: value`)")]
    InvalidHeader(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
