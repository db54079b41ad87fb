//! Backend gateway: the four backend operations the orchestrator needs.
//!
//! [`BackendGateway`] is the seam between the upscale protocol and the
//! transport. [`ComfyUIGateway`] implements it over the ComfyUI REST API
//! and WebSocket endpoint and is safe to share across concurrent jobs.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError, ImageUpload};
use crate::channel::WsEventChannel;
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::events::EventChannel;
use crate::history::{manifest_from_history, OutputManifest};
use crate::workflow::{GraphError, JobGraph};

/// Reference to an image stored on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub name: String,
    pub subfolder: String,
}

/// Errors from any gateway operation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Client(#[from] ComfyUIClientError),

    #[error("Invalid job graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("Unexpected response from ComfyUI: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Store an image and return the name the backend assigned to it.
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, GatewayError>;

    /// Queue a graph for execution on behalf of `client_id`; returns the job id.
    async fn submit(&self, graph: &JobGraph, client_id: &str) -> Result<String, GatewayError>;

    /// Subscribe to the events addressed to `client_id`.
    async fn open_event_channel(
        &self,
        client_id: &str,
    ) -> Result<Box<dyn EventChannel>, GatewayError>;

    /// Outputs recorded for `job_id`, or `None` if the result store does
    /// not know the job yet.
    async fn fetch_job_outputs(&self, job_id: &str)
        -> Result<Option<OutputManifest>, GatewayError>;
}

/// [`BackendGateway`] backed by a ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIGateway {
    api: ComfyUIApi,
    client: ComfyUIClient,
}

impl ComfyUIGateway {
    pub fn new(api: ComfyUIApi, client: ComfyUIClient) -> Self {
        Self { api, client }
    }
}

#[async_trait]
impl BackendGateway for ComfyUIGateway {
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, GatewayError> {
        let response = self.api.upload_image(image).await?;
        tracing::debug!(name = %response.name, subfolder = %response.subfolder, "Image uploaded");
        Ok(StoredImage {
            name: response.name,
            subfolder: response.subfolder,
        })
    }

    async fn submit(&self, graph: &JobGraph, client_id: &str) -> Result<String, GatewayError> {
        graph.validate()?;
        let response = self.api.submit_workflow(&graph.to_prompt(), client_id).await?;
        tracing::info!(
            client_id,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn open_event_channel(
        &self,
        client_id: &str,
    ) -> Result<Box<dyn EventChannel>, GatewayError> {
        let conn = self.client.connect(client_id).await?;
        Ok(Box::new(WsEventChannel::new(self.client.clone(), conn)))
    }

    async fn fetch_job_outputs(
        &self,
        job_id: &str,
    ) -> Result<Option<OutputManifest>, GatewayError> {
        let history = self.api.get_history(job_id).await?;
        Ok(manifest_from_history(&history, job_id)?)
    }
}
