//! Error kinds (§7): `ValidationError` (400), `AuthError` (400/Unauthenticated),
//! `NotFoundError` (404), `TransientStorageError` (retryable, 500 once
//! retries exhaust), `FatalStorageError` (500), `InternalError` (500).
//! Propagated as a single enum so every middleware/handler abort carries
//! both an HTTP status and a gRPC status without duplicating the mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TransientStorage(String),
    #[error("{0}")]
    FatalStorage(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TransientStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::FatalStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            ApiError::Validation(_) => tonic::Code::InvalidArgument,
            ApiError::Auth(_) => tonic::Code::Unauthenticated,
            ApiError::NotFound(_) => tonic::Code::NotFound,
            ApiError::TransientStorage(_) | ApiError::FatalStorage(_) | ApiError::Internal(_) => {
                tonic::Code::Internal
            }
        }
    }

    pub fn into_status(self) -> tonic::Status {
        tonic::Status::new(self.grpc_code(), self.to_string())
    }
}

/// Never leaks internals beyond a status and a plain-text reason (§7).
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
