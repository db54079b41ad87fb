//! Shared helpers for API integration tests: an in-process fake ComfyUI
//! backend, an app builder wired to it, and request/response utilities.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use upscale_api::config::{ComfyUIConfig, ServerConfig};
use upscale_api::router::build_app_router;
use upscale_api::state::AppState;
use upscale_comfyui::api::ComfyUIApi;
use upscale_comfyui::client::ComfyUIClient;
use upscale_comfyui::gateway::ComfyUIGateway;
use upscale_comfyui::orchestrator::{Upscaler, DEFAULT_VIEW_PATH};
use upscale_core::random::FixedRandom;
use upscale_core::upscale::UpscalePolicy;

pub const PROMPT_ID: &str = "fake-prompt";
pub const CLIENT_ID: &str = "4c1d7a3e-2b5f-4e8a-9c0d-1e2f3a4b5c6d";
pub const OUTPUT_FILE: &str = "upscale_00001_.png";
pub const STORED_IMAGE: &[u8] = b"\x89PNG upscaled pixels";

/// An address nothing listens on.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

// ---------------------------------------------------------------------------
// Fake ComfyUI backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeComfyUI {
    /// `(field name, file name, byte count)` of every uploaded part.
    pub uploads: Mutex<Vec<(String, Option<String>, usize)>>,
    pub prompts: Mutex<Vec<Value>>,
    pub history_calls: AtomicUsize,
    /// Answer `/prompt` with 400.
    pub reject_prompts: bool,
    /// Frames pushed to every WebSocket subscriber.
    pub frames: Vec<String>,
}

impl FakeComfyUI {
    /// A backend that completes every job after two progress updates.
    pub fn completing() -> Self {
        Self {
            frames: vec![
                format!(r#"{{"type":"execution_start","data":{{"prompt_id":"{PROMPT_ID}"}}}}"#),
                r#"{"type":"progress","data":{"value":1,"max":2}}"#.into(),
                r#"{"type":"progress","data":{"value":2,"max":2}}"#.into(),
                format!(r#"{{"type":"executing","data":{{"node":null,"prompt_id":"{PROMPT_ID}"}}}}"#),
            ],
            ..Default::default()
        }
    }

    pub fn prompts(&self) -> Vec<Value> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, Option<String>, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

async fn fake_upload(State(fake): State<Arc<FakeComfyUI>>, mut multipart: Multipart) -> Json<Value> {
    let mut stored = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.unwrap();
        if name == "image" {
            stored = file_name.clone().unwrap_or_default();
        }
        fake.uploads.lock().unwrap().push((name, file_name, data.len()));
    }
    Json(json!({ "name": stored, "subfolder": "", "type": "input" }))
}

async fn fake_prompt(State(fake): State<Arc<FakeComfyUI>>, Json(body): Json<Value>) -> Response {
    if fake.reject_prompts {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "type": "prompt_outputs_failed_validation" } })),
        )
            .into_response();
    }
    fake.prompts.lock().unwrap().push(body);
    Json(json!({ "prompt_id": PROMPT_ID, "number": 1, "node_errors": {} })).into_response()
}

async fn fake_history(
    State(fake): State<Arc<FakeComfyUI>>,
    Path(prompt_id): Path<String>,
) -> Json<Value> {
    fake.history_calls.fetch_add(1, Ordering::SeqCst);
    if prompt_id != PROMPT_ID {
        return Json(json!({}));
    }
    Json(json!({
        prompt_id: {
            "outputs": {
                "10": { "images": [
                    { "filename": OUTPUT_FILE, "subfolder": "", "type": "output" }
                ] }
            }
        }
    }))
}

async fn fake_view(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("filename").map(String::as_str) {
        Some(OUTPUT_FILE) if params.get("type").map(String::as_str) == Some("output") => (
            [(header::CONTENT_TYPE, "image/webp")],
            STORED_IMAGE.to_vec(),
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn fake_ws(State(fake): State<Arc<FakeComfyUI>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| push_frames(socket, fake))
}

async fn push_frames(mut socket: WebSocket, fake: Arc<FakeComfyUI>) {
    for frame in &fake.frames {
        if socket.send(Message::Text(frame.as_str().into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

/// Serve `fake` on an ephemeral port; returns its `host:port`.
pub async fn spawn_fake_comfyui(fake: Arc<FakeComfyUI>) -> String {
    let app = Router::new()
        .route("/upload/image", post(fake_upload))
        .route("/prompt", post(fake_prompt))
        .route("/history/{prompt_id}", axum::routing::get(fake_history))
        .route("/view", axum::routing::get(fake_view))
        .route("/ws", axum::routing::get(fake_ws))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

// ---------------------------------------------------------------------------
// App under test
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` pointing at `api_url`/`ws_url`, with short
/// retry delays so failing jobs finish quickly.
pub fn test_config(api_url: &str, ws_url: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        comfyui: ComfyUIConfig {
            api_url: api_url.to_string(),
            ws_url: ws_url.to_string(),
            view_timeout: Duration::from_secs(5),
        },
        default_resolution: 4000,
        upscale_policy: UpscalePolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(20),
            deadline: Duration::from_secs(10),
        },
        view_path: DEFAULT_VIEW_PATH.to_string(),
    }
}

/// Build the full application router against a backend at `addr`
/// (`host:port`), using the same middleware stack as production.
pub fn build_test_app(addr: &str) -> Router {
    build_app_with_config(test_config(&format!("http://{addr}"), &format!("ws://{addr}")))
}

/// Build the application against a backend that does not exist.
pub fn build_unreachable_app() -> Router {
    build_app_with_config(test_config(UNREACHABLE_URL, "ws://127.0.0.1:1"))
}

pub fn build_app_with_config(config: ServerConfig) -> Router {
    let api = ComfyUIApi::new(&config.comfyui.api_url);
    let gateway = Arc::new(ComfyUIGateway::new(
        api.clone(),
        ComfyUIClient::new(&config.comfyui.ws_url),
    ));
    let upscaler = Upscaler::new(gateway, Arc::new(FixedRandom::new(CLIENT_ID, 42)))
        .with_policy(config.upscale_policy)
        .with_view_path(config.view_path.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        comfyui: api,
        upscaler: Arc::new(upscaler),
        jobs: TaskTracker::new(),
    };

    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// One multipart form part: `(field name, file name, content)`.
pub type FormPart<'a> = (&'a str, Option<&'a str>, &'a [u8]);

const BOUNDARY: &str = "upscale-test-boundary";

/// Encode `parts` as a `multipart/form-data` body.
pub fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
            }
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[FormPart<'_>]) -> Response {
    app.oneshot(
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
