use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Attempt is submitted and can no longer be changed")]
    Locked,

    #[error("Attempt has already been submitted")]
    AlreadySubmitted,

    #[error("Interaction is frozen after the exam view lost focus")]
    LockedOut,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code carried in the `error` field of responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Locked => "locked",
            Error::AlreadySubmitted => "already_submitted",
            Error::LockedOut => "locked_out",
            Error::NotFound(_) => "not_found",
            Error::ValidationFailed(_) | Error::Validation(_) | Error::Json(_) => {
                "validation_failed"
            }
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Reqwest(_) => "upstream_error",
            _ => "internal_error",
        }
    }

    /// Rebuilds an error from a response body produced by `into_response`.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "locked" => Error::Locked,
            "already_submitted" => Error::AlreadySubmitted,
            "locked_out" => Error::LockedOut,
            "not_found" => Error::NotFound(message),
            "validation_failed" => Error::ValidationFailed(message),
            "unauthorized" => Error::Unauthorized(message),
            "forbidden" => Error::Forbidden(message),
            _ => Error::Internal(message),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let display = self.to_string();
        let (status, error_message) = match self {
            Error::Locked | Error::LockedOut => (StatusCode::LOCKED, display),
            Error::AlreadySubmitted => (StatusCode::CONFLICT, display),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::ValidationFailed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Error::Validation(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            Error::Json(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Error::Reqwest(err) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", err),
            ),
            Error::Database(err) => {
                tracing::error!(error = ?err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": code, "message": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
