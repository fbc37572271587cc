use thiserror::Error;

use strongbox_core::ValidationError;

/// Errors from artifact catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("artifact already exists: {0}")]
    Duplicate(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}
