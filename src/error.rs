use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Cannot join your own session")]
    SelfJoin,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Illegal move: {0}")]
    IllegalMove(String),

    #[error("Concurrent modification, please retry")]
    Conflict,

    #[error("Settlement submitter failure: {0}")]
    SubmitterFailure(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, shared by the HTTP error body
    /// and the WebSocket `error` message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::AlreadyExists(_) => "ALREADY_EXISTS",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::SelfJoin => "SELF_JOIN",
            AppError::NotYourTurn => "NOT_YOUR_TURN",
            AppError::IllegalMove(_) => "ILLEGAL_MOVE",
            AppError::Conflict => "CONFLICT",
            AppError::SubmitterFailure(_) => "SUBMITTER_FAILURE",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) | AppError::InvalidState(_) | AppError::Conflict => {
                StatusCode::CONFLICT
            }
            AppError::Unauthorized(_) | AppError::NotYourTurn => StatusCode::FORBIDDEN,
            AppError::SelfJoin | AppError::IllegalMove(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            // Settlement failures are an operator concern, retried by
            // the next reconciler sweep. Clients never see the raw error.
            AppError::SubmitterFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let code = self.code().to_string();
        let message = match &self {
            AppError::SubmitterFailure(_) => "Settlement is delayed, retrying".to_string(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code,
                message,
                details: None,
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_errors_map_to_the_cache_code() {
        let err = AppError::from(redis::RedisError::from((
            redis::ErrorKind::Io,
            "connection refused",
        )));
        assert_eq!(err.code(), "CACHE_ERROR");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn submitter_failures_return_service_unavailable() {
        let err = AppError::SubmitterFailure("raw rpc detail".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
