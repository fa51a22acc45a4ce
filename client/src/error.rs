//! Error types for the client.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised outside the mutation lifecycle.
///
/// Failed mutations never surface here: they settle as rolled back and
/// report through their outcome and notice.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] optimist_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<optimist_engine::RemoteError> for ClientError {
    fn from(err: optimist_engine::RemoteError) -> Self {
        ClientError::Engine(err.into())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
