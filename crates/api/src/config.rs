use std::str::FromStr;
use std::time::Duration;

use upscale_comfyui::orchestrator::DEFAULT_VIEW_PATH;
use upscale_core::upscale::{UpscalePolicy, DEFAULT_RESOLUTION};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Must exceed the upscale deadline
    /// so synchronous upscale requests are not cut short.
    pub request_timeout_secs: u64,
    /// Backend connection settings.
    pub comfyui: ComfyUIConfig,
    /// Resolution used when an upscale request does not name one.
    pub default_resolution: u32,
    /// Retry and deadline policy for upscale jobs.
    pub upscale_policy: UpscalePolicy,
    /// Route prefix used to build image locators.
    pub view_path: String,
}

/// Where the ComfyUI backend lives.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    /// Upstream timeout for streaming output images.
    pub view_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                    |
    /// |------------------------------|----------------------------|
    /// | `HOST`                       | `0.0.0.0`                  |
    /// | `PORT`                       | `3000`                     |
    /// | `CORS_ORIGINS`               | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`       | `360`                      |
    /// | `COMFYUI_API_URL`            | `http://127.0.0.1:8188`    |
    /// | `COMFYUI_WS_URL`             | `ws://127.0.0.1:8188`      |
    /// | `COMFYUI_VIEW_TIMEOUT_SECS`  | `120`                      |
    /// | `UPSCALE_DEFAULT_RESOLUTION` | `4000`                     |
    /// | `UPSCALE_MAX_ATTEMPTS`       | `5`                        |
    /// | `UPSCALE_RETRY_DELAY_MS`     | `1000`                     |
    /// | `UPSCALE_DEADLINE_SECS`      | `300`                      |
    /// | `UPSCALE_VIEW_PATH`          | `/api/comfyui/view`        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 360);

        let comfyui = ComfyUIConfig {
            api_url: std::env::var("COMFYUI_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8188".into()),
            ws_url: std::env::var("COMFYUI_WS_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8188".into()),
            view_timeout: Duration::from_secs(env_or("COMFYUI_VIEW_TIMEOUT_SECS", 120)),
        };

        let default_resolution: u32 = env_or("UPSCALE_DEFAULT_RESOLUTION", DEFAULT_RESOLUTION);
        assert!(
            default_resolution > 0,
            "UPSCALE_DEFAULT_RESOLUTION must be positive"
        );

        let defaults = UpscalePolicy::default();
        let upscale_policy = UpscalePolicy {
            max_attempts: env_or("UPSCALE_MAX_ATTEMPTS", defaults.max_attempts),
            retry_delay: Duration::from_millis(env_or(
                "UPSCALE_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )),
            deadline: Duration::from_secs(env_or(
                "UPSCALE_DEADLINE_SECS",
                defaults.deadline.as_secs(),
            )),
        };

        let view_path =
            std::env::var("UPSCALE_VIEW_PATH").unwrap_or_else(|_| DEFAULT_VIEW_PATH.into());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            comfyui,
            default_resolution,
            upscale_policy,
            view_path,
        }
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
///
/// Panics on an unparseable value so misconfiguration fails at startup.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
