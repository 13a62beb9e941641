// ABOUTME: Shared API response types and error handling
// ABOUTME: Maps session errors onto HTTP status codes with a consistent JSON envelope

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use codenest_sandbox::SessionError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Session(e) => match e {
                SessionError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
                SessionError::WorkspaceMissing(_) | SessionError::SandboxNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SessionError::CreationConflict(_) => StatusCode::CONFLICT,
                SessionError::ExecTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Session(SessionError::Storage(_)) => "Database error".to_string(),
            ApiError::Session(SessionError::Io(_)) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            ResponseJson(ApiResponse::<()>::error(self.public_message())),
        )
            .into_response()
    }
}

/// Wrap a successful result in `ApiResponse`, or log `context` and render the error
pub fn ok_or_api_error<T: Serialize>(result: Result<T, ApiError>, context: &str) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, ResponseJson(ApiResponse::success(data))).into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("{}: {}", context, e);
            }
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codenest_sandbox::StorageError;

    #[test]
    fn test_session_error_status_codes() {
        let cases = [
            (
                SessionError::RuntimeUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SessionError::InvalidCommand("nul".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                SessionError::WorkspaceMissing("/nope".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                SessionError::ExecTimeout { seconds: 5 },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                SessionError::ExecutionFailed("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn test_storage_errors_are_not_leaked() {
        let error = ApiError::from(SessionError::Storage(StorageError::NotFound(
            "alice".to_string(),
        )));
        assert_eq!(error.public_message(), "Database error");
    }
}
