//! Error types for the Optimist engine.

use crate::{RemoteError, ViewKey};
use thiserror::Error;

/// All possible errors from the Optimist engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote errors
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    // View errors
    #[error("view not loaded: {0}")]
    StaleView(ViewKey),

    #[error("unknown view key: {0}")]
    UnknownViewKey(String),

    #[error("mutation wrote to undeclared view: {0}")]
    UndeclaredView(ViewKey),

    // Projection errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("entity '{id}' in view {view} is not a {expected}")]
    KindMismatch {
        view: ViewKey,
        id: String,
        expected: &'static str,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
