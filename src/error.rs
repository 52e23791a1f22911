use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed stored value: {0}")]
    Corrupted(String),

    #[error("QR code {0} already exists")]
    DuplicateCode(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),

    #[error("Request to the store timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Persistence(PersistenceError::DuplicateCode(_)) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Timeout(_) | AppError::Persistence(_) => {
                tracing::error!("{}", self);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
                    .into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}
