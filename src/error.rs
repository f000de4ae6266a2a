//! Error handling

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{error, info, warn};

/// Failure taxonomy for the pixelforge application.
#[derive(Debug)]
pub enum AppError {
    /// Bad user input; the message is surfaced as-is.
    Validation(String),
    /// The model call exceeded the configured deadline.
    Timeout,
    /// Model-side failure; detail is logged, a safe message is surfaced.
    Generation(String),
    /// Filesystem failure; detail is logged, a safe message is surfaced.
    Storage(String),
    /// Unknown or invalid artifact name.
    NotFound(String),
    /// Client exceeded its request budget.
    RateLimited(String),
    /// When an internal server error occurs
    InternalServerError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<axum::http::Error> for AppError {
    fn from(err: axum::http::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Validation(message) => {
                info!("Validation failure: {}", message);
                (StatusCode::BAD_REQUEST, message)
            }
            AppError::Timeout => {
                warn!("Generation timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "Image generation timed out, please try again".to_string(),
                )
            }
            AppError::Generation(detail) => {
                error!("Generation failed: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    "Image generation failed, please try again later".to_string(),
                )
            }
            AppError::Storage(detail) => {
                error!("Storage failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not store the generated image".to_string(),
                )
            }
            AppError::NotFound(name) => {
                info!("404 {}", name);
                (StatusCode::NOT_FOUND, "File not found".to_string())
            }
            AppError::RateLimited(message) => {
                warn!("Rate limited: {}", message);
                (StatusCode::TOO_MANY_REQUESTS, message)
            }
            AppError::InternalServerError(detail) => {
                error!("Internal server error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "success": false, "error": message }));
        (status, body).into_response()
    }
}
