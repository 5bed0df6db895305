use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Retrying would repeat the same invalid request (4xx, malformed body).
    #[error("Permanent API error: {0}")]
    Permanent(String),

    /// Timeout, connection failure, 5xx or rate-limit response.
    #[error("Transient API error: {message}")]
    Transient {
        message: String,
        /// Server-requested delay (`Retry-After`), if any.
        retry_after: Option<Duration>,
    },

    #[error("Circuit open for {target}; retry in {}s", retry_in.as_secs())]
    CircuitOpen { target: String, retry_in: Duration },

    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// The API answered 404 for a resource that is not a station lookup.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether a retry of the same request could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short machine-friendly label used in logs and run summaries.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "configuration",
            Self::Permanent(_) => "permanent",
            Self::Transient { .. } => "transient",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::StationNotFound(_) => "station_not_found",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::Database(e) => {
                tracing::error!("Database error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            Self::Config(e) => {
                tracing::error!("Config error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
            Self::StationNotFound(_) | Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Permanent(_) | Self::Transient { .. } | Self::CircuitOpen { .. } => {
                tracing::error!(error = %self, "Upstream API error");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Self::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
