//! Error types for the catalog engine.

use thiserror::Error;

/// All possible errors from the catalog engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Document shape errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Business rule errors
    #[error("invalid product field '{field}': {reason}")]
    InvalidProduct { field: String, reason: String },

    // Sync bookkeeping errors
    #[error("invalid sync cursor: {0}")]
    InvalidCursor(String),
}

impl Error {
    pub(crate) fn invalid_product(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidProduct {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
