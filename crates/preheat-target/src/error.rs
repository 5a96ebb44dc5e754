//! Transport error types.

use std::time::Duration;

use preheat_core::Protocol;
use thiserror::Error;

/// A warmup request that never reached the target.
///
/// Anything the target actually answered, even with an error status, is a
/// [`crate::Delivery`], not a `SendError`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("target unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid JSON payload for {method}: {reason}")]
    InvalidPayload { method: String, reason: String },

    #[error("no {0} client configured for this run")]
    NoClient(Protocol),
}

/// Errors raised while constructing a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}
