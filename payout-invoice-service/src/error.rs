use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Xero is not connected")]
    NotConnected,

    #[error("Invalid OAuth callback: {0}")]
    OAuthCallback(String),

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("REST route missing: {0}. Ensure WooPayments is active and its REST endpoints are not disabled.")]
    RouteMissing(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    UpstreamStatus {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned invalid JSON")]
    InvalidJson { provider: &'static str },

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::NotConnected => (
                StatusCode::CONFLICT,
                "Xero is not connected".to_string(),
                None,
            ),
            AppError::OAuthCallback(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid OAuth callback: {}", msg),
                None,
            ),
            err @ AppError::Transport { .. } => {
                (StatusCode::BAD_GATEWAY, err.to_string(), None)
            }
            err @ AppError::RouteMissing(_) => (StatusCode::BAD_GATEWAY, err.to_string(), None),
            err @ AppError::UpstreamStatus { .. } => {
                (StatusCode::BAD_GATEWAY, err.to_string(), None)
            }
            err @ AppError::InvalidJson { .. } => (StatusCode::BAD_GATEWAY, err.to_string(), None),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
