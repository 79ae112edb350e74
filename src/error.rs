use actix_web::{HttpResponse, ResponseError};
use error_types::{error_codes, error_types as error_families, ErrorResponse};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Service error taxonomy.
///
/// `Conflict` is resolved internally where possible (conversation creation
/// races re-read the winning row) and only surfaces when resolution itself
/// fails. `TransientStorage` is the only retryable variant; the service layer
/// retries it once with backoff before surfacing. `Transport` is confined to
/// a single connection and never blocks delivery to others.
#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage temporarily unavailable: {0}")]
    TransientStorage(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl AppError {
    /// Whether the operation may be retried (storage timeout / lost connection).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientStorage(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::Conflict(_) => 409,
            AppError::TransientStorage(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Storage(_)
            | AppError::Transport(_) => 500,
        }
    }

    fn family_and_code(&self) -> (&'static str, &'static str) {
        match self {
            AppError::Validation(_) => (
                error_families::VALIDATION_ERROR,
                error_codes::INVALID_REQUEST,
            ),
            AppError::Unauthorized => (
                error_families::AUTHENTICATION_ERROR,
                error_codes::INVALID_CREDENTIALS,
            ),
            AppError::Forbidden => (
                error_families::AUTHORIZATION_ERROR,
                error_codes::NOT_CONVERSATION_PARTICIPANT,
            ),
            AppError::NotFound => (
                error_families::NOT_FOUND_ERROR,
                error_codes::MESSAGE_NOT_FOUND,
            ),
            AppError::Conflict(_) => (
                error_families::CONFLICT_ERROR,
                error_codes::CONVERSATION_CONFLICT,
            ),
            AppError::TransientStorage(_) => (
                error_families::SERVICE_UNAVAILABLE_ERROR,
                error_codes::STORAGE_TIMEOUT,
            ),
            AppError::Storage(_) => (error_families::SERVER_ERROR, error_codes::DATABASE_ERROR),
            AppError::Config(_) | AppError::StartServer(_) | AppError::Transport(_) => (
                error_families::SERVER_ERROR,
                error_codes::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let status = self.status_code();
        let (family, code) = self.family_and_code();
        let title = match status {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            409 => "Conflict",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        };
        ErrorResponse::new(title, &self.to_string(), status, family, code)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let body = self.to_error_response();
        HttpResponse::build(
            actix_web::http::StatusCode::from_u16(body.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        )
        .json(body)
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(state) = e.code() {
            if *state == tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                return AppError::Conflict(e.to_string());
            }
        }
        if e.is_closed() {
            return AppError::TransientStorage(e.to_string());
        }
        AppError::Storage(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Timeout(_) => AppError::TransientStorage(e.to_string()),
            deadpool_postgres::PoolError::Backend(inner) => inner.into(),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Validation("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::Forbidden.status_code(), 403);
        assert_eq!(AppError::NotFound.status_code(), 404);
        assert_eq!(AppError::Conflict("dup".into()).status_code(), 409);
        assert_eq!(AppError::TransientStorage("t".into()).status_code(), 503);
        assert_eq!(AppError::Storage("s".into()).status_code(), 500);
    }

    #[test]
    fn test_only_transient_storage_is_retryable() {
        assert!(AppError::TransientStorage("timeout".into()).is_retryable());
        assert!(!AppError::Storage("broken".into()).is_retryable());
        assert!(!AppError::Conflict("dup".into()).is_retryable());
        assert!(!AppError::Forbidden.is_retryable());
    }

    #[test]
    fn test_error_response_shape() {
        let body = AppError::Forbidden.to_error_response();
        assert_eq!(body.status, 403);
        assert_eq!(body.error_type, "authorization_error");

        let body = AppError::TransientStorage("pool wait".into()).to_error_response();
        assert_eq!(body.status, 503);
        assert_eq!(body.code, "STORAGE_TIMEOUT");
    }
}
