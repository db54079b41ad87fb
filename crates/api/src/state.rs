use std::sync::Arc;

use tokio_util::task::TaskTracker;
use upscale_comfyui::api::ComfyUIApi;
use upscale_comfyui::orchestrator::Upscaler;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Raw ComfyUI client used by the pass-through routes.
    pub comfyui: ComfyUIApi,
    /// Job orchestrator used by the upscale routes.
    pub upscaler: Arc<Upscaler>,
    /// Detached upscale jobs started by streaming requests. Drained on
    /// shutdown so no job is cut off between submission and channel close.
    pub jobs: TaskTracker,
}
