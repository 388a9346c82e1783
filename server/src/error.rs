//! API error handling.
//!
//! Every handler returns [`ApiResult`]. Core errors are mapped onto a status
//! code by their [`ErrorKind`] and rendered as
//! `{ "code": ..., "message": ..., "retryable": ... }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};
use tubedeck_core::{Error, ErrorKind};

/// Error body sent to the dashboard.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Whether trying again may succeed.
    pub retryable: bool,
    /// Suggested wait before retrying, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// API error that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
            retry_after_secs: None,
        }
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

const fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "invalid_input"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        ErrorKind::Locked => (StatusCode::TOO_MANY_REQUESTS, "locked"),
        ErrorKind::Network => (StatusCode::BAD_GATEWAY, "network"),
        ErrorKind::Playback => (StatusCode::SERVICE_UNAVAILABLE, "playback"),
        ErrorKind::Cancelled => (StatusCode::CONFLICT, "cancelled"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, code) = status_for(err.kind());
        if status.is_server_error() {
            error!("Request failed [{}]: {}", code, err);
        } else {
            warn!("Request rejected [{}]: {}", code, err);
        }
        Self {
            status,
            code,
            message: err.to_string(),
            retryable: err.is_retryable(),
            retry_after_secs: err.retry_delay_secs(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!("Background task failed: {}", err);
        Self::internal(format!("background task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            retryable: self.retryable,
            retry_after_secs: self.retry_after_secs,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tubedeck_core::{AuthError, DownloadError, LibraryError};

    #[test]
    fn test_status_follows_error_kind() {
        let err = ApiError::from(Error::Library(LibraryError::FileNotFound {
            path: PathBuf::from("gone.mp3"),
        }));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
        assert!(!err.retryable);

        let err = ApiError::from(Error::Auth(AuthError::WrongPassword {
            remaining_attempts: 2,
        }));
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_lockout_reports_wait() {
        let err = ApiError::from(Error::Auth(AuthError::LockedOut {
            remaining_secs: 120,
        }));
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs, Some(120));
    }

    #[test]
    fn test_network_errors_are_retryable() {
        let err = ApiError::from(Error::Download(DownloadError::Network(
            "connection reset".to_string(),
        )));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.retryable);
    }
}
