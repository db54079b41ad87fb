//! Route definitions for the `/comfyui` pass-through.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::comfyui;
use crate::state::AppState;

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Routes mounted at `/comfyui`.
///
/// ```text
/// POST   /upload                -> upload
/// POST   /prompt                -> prompt
/// GET    /history/{prompt_id}   -> history
/// GET    /view                  -> view
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(comfyui::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/prompt", post(comfyui::prompt))
        .route("/history/{prompt_id}", get(comfyui::history))
        .route("/view", get(comfyui::view))
}
