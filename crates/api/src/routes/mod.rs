pub mod comfyui;
pub mod health;
pub mod upscale;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// /comfyui/upload                 forward image upload (POST)
/// /comfyui/prompt                 forward workflow submission (POST)
/// /comfyui/history/{prompt_id}    forward history lookup (GET)
/// /comfyui/view                   stream a stored image (GET)
///
/// /upscale                        run an upscale job, answer when done (POST)
/// /upscale/stream                 run an upscale job, stream progress (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/comfyui", comfyui::router())
        .nest("/upscale", upscale::router())
}
