//! Server-side upscale endpoints.
//!
//! Both endpoints accept the same multipart form: a required `image` file
//! and an optional `resolution`. `POST /api/upscale` answers once the job is
//! over; `POST /api/upscale/stream` reports progress as server-sent events
//! and finishes with a single `result` event.

use std::convert::Infallible;
use std::num::NonZeroU32;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use upscale_comfyui::api::ImageUpload;
use upscale_comfyui::orchestrator::{LogProgress, UpscaleResult};
use upscale_core::upscale::{validate_resolution, UpscaleErrorKind, UpscaleStatus};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// File name given to uploads whose form part carries none.
const FALLBACK_FILE_NAME: &str = "image.png";

/// A parsed upscale form.
#[derive(Debug)]
pub struct UpscaleRequest {
    pub image: ImageUpload,
    pub resolution: NonZeroU32,
}

/// JSON rendering of an [`UpscaleResult`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&UpscaleResult> for UpscaleResponse {
    fn from(result: &UpscaleResult) -> Self {
        match result {
            Ok(locator) => Self {
                success: true,
                image_url: Some(locator.as_str().to_string()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                image_url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// One `progress` event payload.
#[derive(Debug, Serialize)]
struct ProgressPayload {
    #[serde(flatten)]
    status: UpscaleStatus,
    message: String,
}

/// Read the `image` and `resolution` fields. Unknown fields are ignored.
async fn read_upscale_form(
    mut multipart: Multipart,
    default_resolution: u32,
) -> AppResult<UpscaleRequest> {
    let mut image = None;
    let mut resolution = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "image" => {
                let file_name = field.file_name().unwrap_or(FALLBACK_FILE_NAME).to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                image = Some(ImageUpload {
                    bytes: bytes.to_vec(),
                    file_name,
                    content_type,
                });
            }
            "resolution" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let value: i64 = text.trim().parse().map_err(|_| {
                    AppError::BadRequest(format!("resolution must be an integer, got '{text}'"))
                })?;
                resolution = Some(validate_resolution(value)?);
            }
            _ => {}
        }
    }

    let image = image
        .filter(|i| !i.bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required 'image' field".into()))?;
    let resolution = match resolution {
        Some(r) => r,
        None => validate_resolution(i64::from(default_resolution))?,
    };

    Ok(UpscaleRequest { image, resolution })
}

/// HTTP status for a finished job.
fn result_status(result: &UpscaleResult) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(e) if e.kind() == UpscaleErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Err(_) => StatusCode::BAD_GATEWAY,
    }
}

/// POST /api/upscale
pub async fn upscale(State(state): State<AppState>, multipart: Multipart) -> AppResult<Response> {
    let request = read_upscale_form(multipart, state.config.default_resolution).await?;

    let result = state
        .upscaler
        .run(request.image, request.resolution, &LogProgress)
        .await;

    Ok((result_status(&result), Json(UpscaleResponse::from(&result))).into_response())
}

/// POST /api/upscale/stream
///
/// The job runs on a tracked task so that a client disconnect does not
/// interrupt it halfway; it still ends by its own deadline and closes its
/// event channel.
pub async fn upscale_stream(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let request = read_upscale_form(multipart, state.config.default_resolution).await?;

    let (tx, rx) = mpsc::unbounded_channel::<UpscaleStatus>();
    let (done_tx, done_rx) = oneshot::channel::<UpscaleResult>();
    let upscaler = state.upscaler.clone();

    state.jobs.spawn(async move {
        let result = upscaler.run(request.image, request.resolution, &tx).await;
        // Progress must be fully flushed before the result is announced.
        drop(tx);
        let _ = done_tx.send(result);
    });

    let progress = UnboundedReceiverStream::new(rx).map(|status| {
        let payload = ProgressPayload {
            message: status.to_string(),
            status,
        };
        Ok(sse_event("progress", &payload))
    });

    let result = stream::once(async move {
        let response = match done_rx.await {
            Ok(result) => UpscaleResponse::from(&result),
            Err(_) => UpscaleResponse {
                success: false,
                image_url: None,
                error: Some("Upscale task ended unexpectedly".into()),
            },
        };
        Ok(sse_event("result", &response))
    });

    Ok(Sse::new(progress.chain(result)).keep_alive(KeepAlive::default()))
}

fn sse_event(name: &'static str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, event = name, "Failed to serialize SSE payload");
            Event::default().event(name).data("{}")
        })
}
