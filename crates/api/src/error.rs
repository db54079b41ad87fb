use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use upscale_comfyui::api::ComfyUIApiError;
use upscale_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds proxy-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `upscale_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// ComfyUI answered with a non-success status; the status is forwarded.
    #[error("{message} (upstream status {status})")]
    Upstream { status: u16, message: &'static str },

    /// ComfyUI could not be reached or its answer could not be read.
    #[error("Failed to connect to ComfyUI: {details}")]
    Unreachable { status: StatusCode, details: String },
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Classify a backend error for a pass-through route.
    ///
    /// `message` is the route's fixed description of an upstream refusal;
    /// `unreachable` is the status returned when ComfyUI never answered.
    pub fn from_upstream(
        err: ComfyUIApiError,
        message: &'static str,
        unreachable: StatusCode,
    ) -> Self {
        match err {
            ComfyUIApiError::ApiError { status, body } => {
                tracing::warn!(status, body = %body, "{message}");
                AppError::Upstream { status, message }
            }
            ComfyUIApiError::Request(e) => {
                tracing::error!(error = %e, "ComfyUI request failed");
                AppError::Unreachable {
                    status: unreachable,
                    details: e.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            // --- CoreError variants ---
            AppError::Core(CoreError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "code": "VALIDATION_ERROR" }),
            ),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "code": "BAD_REQUEST" }),
            ),

            // --- Proxy errors ---
            AppError::Upstream { status, message } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                json!({ "error": message, "code": "UPSTREAM_ERROR", "status": status }),
            ),
            AppError::Unreachable { status, details } => (
                *status,
                json!({
                    "error": "Failed to connect to ComfyUI",
                    "code": "UPSTREAM_UNREACHABLE",
                    "details": details,
                }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}
