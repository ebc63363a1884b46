//! Error types for fscore-pipeline
//!
//! Pipeline taxonomy:
//! - `Storage` - evidence store / raw log / score file unreadable (terminal)
//! - `Authentication` - login failed after the retry budget (terminal)
//! - `Transport` - one batch request failed (recorded, run continues)
//! - `NothingScored` - every batch failed; earlier results are left in place
//! - `Normalization` - raw log does not decode (terminal for the pass, raw data kept)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by the external scoring service boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Credentials refused by the service
    #[error("Credentials rejected: {0}")]
    Rejected(String),

    /// Network failure, timeout, DNS, connection refused
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// Session cookies no longer accepted
    #[error("Session expired or revoked")]
    SessionExpired,

    /// No live session to send through
    #[error("No authenticated session")]
    NotAuthenticated,

    /// Unexpected HTTP status
    #[error("Service error {0}: {1}")]
    Api(u16, String),

    /// Body could not be read or interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// True when the current session must be dropped before the next request
    pub fn is_session_stale(&self) -> bool {
        matches!(self, ServiceError::SessionExpired | ServiceError::NotAuthenticated)
    }
}

/// Login failed on every attempt of the retry budget
#[derive(Debug, Clone, Error)]
#[error("Authentication failed after {attempts} attempt(s): {last_error}")]
pub struct AuthenticationError {
    pub attempts: u32,
    pub last_error: String,
}

/// A single batch could not be delivered
#[derive(Debug, Clone, Error)]
#[error("Batch {batch_index} transport failure: {reason}")]
pub struct TransportError {
    pub batch_index: usize,
    pub reason: String,
    /// Session was rejected, so it must be re-established
    pub session_stale: bool,
}

/// Raw reply text could not be decoded into a score mapping
///
/// `fragment` is the exact raw text as captured, so an operator can repair it
/// by hand; `cleaned` is what the strict decoder actually saw.
#[derive(Debug, Clone, Error)]
#[error("Normalization failed{}: {reason}; fragment: {fragment:?}", batch_suffix(.batch_index))]
pub struct NormalizationError {
    pub batch_index: Option<usize>,
    pub fragment: String,
    pub cleaned: String,
    pub reason: String,
}

fn batch_suffix(batch_index: &Option<usize>) -> String {
    match batch_index {
        Some(index) => format!(" for batch {}", index),
        None => String::new(),
    }
}

/// Pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Evidence store, raw log or score file could not be read or written
    #[error("Storage error at {}: {reason}", .path.display())]
    Storage { path: PathBuf, reason: String },

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// No batch of the run produced a raw record
    #[error("No batch scored: all {total_batches} batch(es) failed, last error: {last_reason}")]
    NothingScored {
        total_batches: usize,
        last_reason: String,
    },

    /// Invalid argument (batch size, threshold, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// fscore-common error (configuration, I/O)
    #[error("Common error: {0}")]
    Common(#[from] fscore_common::Error),
}

impl PipelineError {
    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - a pipeline run is already active
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Pipeline stage failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(ref err) => {
                let (status, code) = match err {
                    PipelineError::Storage { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                    }
                    PipelineError::Authentication(_) => {
                        (StatusCode::BAD_GATEWAY, "AUTHENTICATION_ERROR")
                    }
                    PipelineError::Transport(_) | PipelineError::NothingScored { .. } => {
                        (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR")
                    }
                    PipelineError::Normalization(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "NORMALIZATION_ERROR")
                    }
                    PipelineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    PipelineError::Common(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR")
                    }
                };
                (status, code, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_error_carries_fragment() {
        let err = NormalizationError {
            batch_index: Some(3),
            fragment: "alice:10 bob:ninety".to_string(),
            cleaned: "alice:10bob:ninety".to_string(),
            reason: "not valid JSON".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("for batch 3"));
        assert!(message.contains("alice:10 bob:ninety"));
    }

    #[test]
    fn test_normalization_error_without_batch() {
        let err = NormalizationError {
            batch_index: None,
            fragment: "x".to_string(),
            cleaned: "x".to_string(),
            reason: "bad".to_string(),
        };
        assert!(err.to_string().starts_with("Normalization failed: bad"));
    }

    #[test]
    fn test_stale_session_classification() {
        assert!(ServiceError::SessionExpired.is_session_stale());
        assert!(ServiceError::NotAuthenticated.is_session_stale());
        assert!(!ServiceError::Unreachable("timeout".into()).is_session_stale());
        assert!(!ServiceError::Api(500, "boom".into()).is_session_stale());
    }

    #[test]
    fn test_api_error_status_mapping() {
        let auth = ApiError::from(PipelineError::from(AuthenticationError {
            attempts: 5,
            last_error: "refused".to_string(),
        }));
        assert_eq!(auth.into_response().status(), StatusCode::BAD_GATEWAY);

        let storage = ApiError::from(PipelineError::storage("/x", "missing"));
        assert_eq!(
            storage.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let nothing = ApiError::from(PipelineError::NothingScored {
            total_batches: 2,
            last_reason: "connection refused".to_string(),
        });
        assert_eq!(nothing.into_response().status(), StatusCode::BAD_GATEWAY);

        let conflict = ApiError::Conflict("busy".to_string());
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }
}
