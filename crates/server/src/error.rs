use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::lifecycle::LifecycleError;

/// Errors that can occur when running the Strongbox server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed (missing or invalid credentials).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission for the requested operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed export does not exist, or its files are gone.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or unsafe input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Per-owner download ceiling reached.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds until the caller can retry.
        retry_after: u64,
    },

    /// Anything the caller cannot fix. The message is safe to return.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Map a lifecycle failure onto its HTTP outcome.
    ///
    /// Messages never leak paths or the identity of another owner.
    pub fn from_lifecycle(err: LifecycleError, retry_after: u64) -> Self {
        match err {
            LifecycleError::NotFound(_) => Self::NotFound("export not found".to_owned()),
            LifecycleError::FilesMissing(_) => Self::NotFound("export files not found".to_owned()),
            LifecycleError::Forbidden(_) => {
                Self::Forbidden("you do not have access to this export".to_owned())
            }
            LifecycleError::RateLimited(_) => Self::RateLimited { retry_after },
            LifecycleError::Validation(e) => Self::BadRequest(e.to_string()),
            LifecycleError::Stream { .. } => Self::Internal("export stream failed".to_owned()),
            LifecycleError::Integrity {
                artifact_id,
                source,
            } => {
                error!(
                    artifact_id = %artifact_id,
                    error = %source,
                    "export record failed integrity check"
                );
                Self::Internal("export record is unavailable".to_owned())
            }
            other => {
                error!(error = %other, "export operation failed");
                Self::Internal("export operation failed".to_owned())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match &self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            Self::Config(msg) | Self::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None)
            }
            Self::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
            Self::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too many concurrent downloads".to_owned(),
                Some(*retry_after),
            ),
        };

        let body = if let Some(retry) = retry_after {
            serde_json::json!({ "error": message, "retry_after": retry })
        } else {
            serde_json::json!({ "error": message })
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let Some(retry) = retry_after {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        response
    }
}
