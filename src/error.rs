//! Error taxonomy shared by every HTTP-facing component.
//!
//! Each variant maps to exactly one HTTP status and one stable `error.kind`
//! string (see spec §7). Handlers return `Result<T, AppError>`; `AppError`
//! implements `IntoResponse` directly so routes can use `?` throughout.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authorization required")]
    AuthRequired,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("subprocess failed: {0}")]
    SubprocessFailed(String),

    #[error("subprocess timed out after {0:?}")]
    SubprocessTimeout(std::time::Duration),

    #[error("no free port found in scan range")]
    PortsExhausted,

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "AuthRequired",
            AppError::NotFound(_) => "NotFound",
            AppError::InvalidArgument(_) => "InvalidArgument",
            AppError::Conflict(_) => "Conflict",
            AppError::PreconditionFailed(_) => "PreconditionFailed",
            AppError::SubprocessFailed(_) => "SubprocessFailed",
            AppError::SubprocessTimeout(_) => "SubprocessTimeout",
            AppError::PortsExhausted => "PortsExhausted",
            AppError::AlreadyRunning(_) => "AlreadyRunning",
            AppError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            AppError::SubprocessFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::SubprocessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::PortsExhausted => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AlreadyRunning(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(kind = self.kind(), "{}", self);
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
