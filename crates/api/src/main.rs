use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upscale_api::config::ServerConfig;
use upscale_api::router::build_app_router;
use upscale_api::state::AppState;
use upscale_comfyui::api::ComfyUIApi;
use upscale_comfyui::client::ComfyUIClient;
use upscale_comfyui::gateway::ComfyUIGateway;
use upscale_comfyui::orchestrator::Upscaler;
use upscale_core::random::ThreadRandom;

/// Extra time granted to in-flight jobs beyond their own deadline.
const JOB_DRAIN_MARGIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "upscale_api=debug,upscale_comfyui=debug,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- ComfyUI backend ---
    let api = ComfyUIApi::new(&config.comfyui.api_url);
    let client = ComfyUIClient::new(&config.comfyui.ws_url);
    tracing::info!(
        api_url = %config.comfyui.api_url,
        ws_url = %config.comfyui.ws_url,
        "ComfyUI backend configured",
    );

    let gateway = Arc::new(ComfyUIGateway::new(api.clone(), client));
    let upscaler = Upscaler::new(gateway, Arc::new(ThreadRandom))
        .with_policy(config.upscale_policy)
        .with_view_path(config.view_path.clone());
    let drain_timeout = config.upscale_policy.deadline + JOB_DRAIN_MARGIN;

    // --- App state ---
    let jobs = TaskTracker::new();
    let state = AppState {
        config: Arc::new(config.clone()),
        comfyui: api,
        upscaler: Arc::new(upscaler),
        jobs: jobs.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!(
        in_flight = jobs.len(),
        "Server stopped accepting connections, draining upscale jobs"
    );
    jobs.close();
    if tokio::time::timeout(drain_timeout, jobs.wait()).await.is_err() {
        tracing::warn!(remaining = jobs.len(), "Upscale jobs still running at exit");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
