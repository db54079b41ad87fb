//! Pass-through handlers for the ComfyUI backend.
//!
//! Each handler forwards its request as-is. A non-2xx upstream answer is
//! returned with the same status and a fixed error message; a backend that
//! never answered yields a connection error.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Json;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Output kind requested when the query does not name one.
const DEFAULT_VIEW_KIND: &str = "output";

/// Content type assumed when the backend does not send one.
const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/png";

/// POST /api/comfyui/upload
///
/// Re-assembles the incoming multipart form field by field and forwards it
/// to `/upload/image`.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<Value>> {
    let mut form = Form::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let mut part = Part::bytes(data.to_vec());
        if let Some(file_name) = file_name {
            part = part.file_name(file_name);
        }
        if let Some(content_type) = content_type {
            part = part
                .mime_str(&content_type)
                .map_err(|e| AppError::BadRequest(format!("Invalid content type: {e}")))?;
        }
        form = form.part(name, part);
    }

    let body = state.comfyui.upload_raw(form).await.map_err(|e| {
        AppError::from_upstream(e, "Upload failed", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(body))
}

/// POST /api/comfyui/prompt
pub async fn prompt(State(state): State<AppState>, Json(body): Json<Value>) -> AppResult<Json<Value>> {
    let response = state.comfyui.submit_raw(&body).await.map_err(|e| {
        AppError::from_upstream(e, "Failed to queue prompt", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(response))
}

/// GET /api/comfyui/history/{prompt_id}
pub async fn history(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> AppResult<Json<Value>> {
    let response = state.comfyui.get_history(&prompt_id).await.map_err(|e| {
        AppError::from_upstream(e, "Failed to get history", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(response))
}

/// Query parameters for the view endpoint.
#[derive(Debug, Deserialize)]
pub struct ViewParams {
    pub filename: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// GET /api/comfyui/view?filename=..&type=..
///
/// Streams the stored file back without buffering it, keeping the upstream
/// content type and length.
pub async fn view(
    State(state): State<AppState>,
    Query(params): Query<ViewParams>,
) -> AppResult<Response> {
    let filename = params
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::BadRequest("Filename required".into()))?;
    let kind = params.kind.as_deref().unwrap_or(DEFAULT_VIEW_KIND);

    let upstream = state
        .comfyui
        .view(&filename, kind, state.config.comfyui.view_timeout)
        .await
        .map_err(|e| AppError::from_upstream(e, "Failed to get image", StatusCode::BAD_GATEWAY))?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or(HeaderValue::from_static(DEFAULT_IMAGE_CONTENT_TYPE));
    let content_length = upstream.headers().get(header::CONTENT_LENGTH).cloned();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, length);
    }

    Ok(response)
}
