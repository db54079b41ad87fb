//! Route definitions for the `/upscale` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;

use crate::handlers::upscale;
use crate::routes::comfyui::MAX_UPLOAD_BYTES;
use crate::state::AppState;

/// Routes mounted at `/upscale`.
///
/// ```text
/// POST   /          -> upscale
/// POST   /stream    -> upscale_stream
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upscale::upscale))
        .route("/stream", post(upscale::upscale_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
