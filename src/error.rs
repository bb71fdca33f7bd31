//! Error taxonomy surfaced to the HTTP boundary.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// What went wrong, independent of the message shown to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    /// Bad credentials at login or password change.
    Unauthorized,
    /// Missing, invalid, expired or stale bearer token.
    Unauthenticated,
    Forbidden,
    NotFound,
    InvalidOrExpiredToken,
    DeliveryFailed,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::InvalidOrExpiredToken => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Unauthorized | ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::DeliveryFailed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{message}")]
    Expected { kind: ErrorKind, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    fn expected(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Expected {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::Validation, message)
    }
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::Conflict, message)
    }
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::Unauthorized, message)
    }
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::Unauthenticated, message)
    }
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::Forbidden, message)
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::NotFound, message)
    }
    pub fn invalid_or_expired_token(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::InvalidOrExpiredToken, message)
    }
    pub fn delivery_failed(message: impl Into<String>) -> Self {
        Self::expected(ErrorKind::DeliveryFailed, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Expected { kind, .. } => *kind,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

/// Failure body: `{"status":"fail","kind":"not_found","message":"..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status_code();
        let message = match self {
            AuthError::Expected { message, .. } => message,
            AuthError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "Something went very wrong!".to_string()
            }
        };
        let body = ErrorBody {
            status: if status.is_server_error() { "error" } else { "fail" },
            kind,
            message,
        };
        (status, Json(body)).into_response()
    }
}
