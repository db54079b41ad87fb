//! Job orchestrator: drives one upscale job from upload to output.
//!
//! Sequence: upload, build graph, submit, open the event channel, interpret
//! events until a terminal one arrives or the deadline passes, then ask the
//! result resolver for the produced file. The completion event only says
//! *when* the job finished; the resolver says *what* it produced, because
//! the backend's result store can lag behind the event.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use upscale_core::random::RandomSource;
use upscale_core::upscale::{progress_percent, UpscaleError, UpscalePolicy, UpscaleStatus};

use crate::api::ImageUpload;
use crate::events::{ChannelEvent, EventChannel};
use crate::gateway::BackendGateway;
use crate::messages::ComfyUIMessage;
use crate::resolver::resolve_output_filename;
use crate::workflow::build_upscale_graph;

/// Default route through which output images are served.
pub const DEFAULT_VIEW_PATH: &str = "/api/comfyui/view";

/// Outcome of one upscale invocation.
pub type UpscaleResult = Result<ImageLocator, UpscaleError>;

// ---------------------------------------------------------------------------
// Progress observers
// ---------------------------------------------------------------------------

/// Receives status updates in emission order. Implementations must not
/// block.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, status: UpscaleStatus);
}

impl ProgressObserver for mpsc::UnboundedSender<UpscaleStatus> {
    fn notify(&self, status: UpscaleStatus) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(status);
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn notify(&self, status: UpscaleStatus) {
        tracing::debug!(%status, "Upscale progress");
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Opaque URI from which the produced image can be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocator(String);

impl ImageLocator {
    /// Locator for an output file served through `view_path`.
    pub fn output(view_path: &str, filename: &str) -> Self {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filename", filename)
            .append_pair("type", "output")
            .finish();
        Self(format!("{view_path}?{query}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Upscaler
// ---------------------------------------------------------------------------

/// Identifies a submitted job for the lifetime of one invocation.
#[derive(Debug, Clone)]
struct JobHandle {
    job_id: String,
    client_id: String,
}

/// Runs upscale jobs against a backend gateway.
///
/// Holds no per-job state, so one instance can serve any number of
/// concurrent invocations.
#[derive(Clone)]
pub struct Upscaler {
    gateway: Arc<dyn BackendGateway>,
    random: Arc<dyn RandomSource>,
    policy: UpscalePolicy,
    view_path: String,
}

impl Upscaler {
    pub fn new(gateway: Arc<dyn BackendGateway>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            gateway,
            random,
            policy: UpscalePolicy::default(),
            view_path: DEFAULT_VIEW_PATH.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: UpscalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_view_path(mut self, view_path: impl Into<String>) -> Self {
        self.view_path = view_path.into();
        self
    }

    /// Upscale `image` to `resolution`, reporting statuses to `progress`.
    pub async fn run(
        &self,
        image: ImageUpload,
        resolution: NonZeroU32,
        progress: &dyn ProgressObserver,
    ) -> UpscaleResult {
        let client_id = self.random.client_id();
        let span = tracing::info_span!("upscale", client_id = %client_id, resolution = resolution.get());

        async {
            let result = self.execute(client_id, image, resolution, progress).await;
            match &result {
                Ok(locator) => tracing::info!(%locator, "Upscale completed"),
                Err(e) => tracing::warn!(kind = ?e.kind(), error = %e, "Upscale failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        client_id: String,
        image: ImageUpload,
        resolution: NonZeroU32,
        progress: &dyn ProgressObserver,
    ) -> UpscaleResult {
        progress.notify(UpscaleStatus::Uploading);
        let stored = self
            .gateway
            .upload(&image)
            .await
            .map_err(|e| UpscaleError::Upload(e.to_string()))?;

        let graph = build_upscale_graph(&stored.name, resolution, self.random.as_ref());

        progress.notify(UpscaleStatus::Starting);
        let job_id = self
            .gateway
            .submit(&graph, &client_id)
            .await
            .map_err(|e| UpscaleError::Submission(e.to_string()))?;
        let handle = JobHandle { job_id, client_id };

        progress.notify(UpscaleStatus::Processing);
        let deadline = Instant::now() + self.policy.deadline;
        let mut channel = match tokio::time::timeout_at(
            deadline,
            self.gateway.open_event_channel(&handle.client_id),
        )
        .await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(UpscaleError::Channel(e.to_string())),
            Err(_) => return Err(UpscaleError::Timeout(self.policy.deadline)),
        };

        self.watch(channel.as_mut(), &handle, deadline, progress)
            .await?;

        let filename =
            resolve_output_filename(self.gateway.as_ref(), &handle.job_id, &self.policy).await?;
        Ok(ImageLocator::output(&self.view_path, &filename))
    }

    /// Interpret channel events until the job completes, fails, or the
    /// deadline passes. The channel is closed exactly once on every exit.
    async fn watch(
        &self,
        channel: &mut dyn EventChannel,
        handle: &JobHandle,
        deadline: Instant,
        progress: &dyn ProgressObserver,
    ) -> Result<(), UpscaleError> {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);
        let mut open = true;

        let outcome = loop {
            tokio::select! {
                () = &mut timer => {
                    break Err(UpscaleError::Timeout(self.policy.deadline));
                }
                event = channel.next_event(), if open => match event {
                    None => {
                        // A close is not a failure; the deadline still decides.
                        tracing::info!(prompt_id = %handle.job_id, "Event channel closed before completion");
                        open = false;
                    }
                    Some(ChannelEvent::Error(e)) => {
                        break Err(UpscaleError::Channel(e));
                    }
                    Some(ChannelEvent::Malformed { raw, error }) => {
                        tracing::warn!(error = %error, raw_message = %raw, "Ignoring malformed ComfyUI message");
                    }
                    Some(ChannelEvent::Message(msg)) => {
                        if let Some(outcome) = interpret(msg, handle, progress) {
                            break outcome;
                        }
                    }
                },
            }
        };

        channel.close().await;
        outcome
    }
}

/// Apply one message. Returns `Some` when it ends the job.
fn interpret(
    msg: ComfyUIMessage,
    handle: &JobHandle,
    progress: &dyn ProgressObserver,
) -> Option<Result<(), UpscaleError>> {
    match msg {
        ComfyUIMessage::Progress(data) => {
            let percent = progress_percent(data.value, data.max);
            progress.notify(UpscaleStatus::Progress { percent });
            None
        }
        ComfyUIMessage::Executing(data) if data.finishes(&handle.job_id) => {
            tracing::info!(prompt_id = %handle.job_id, "Execution completed (all nodes done)");
            Some(Ok(()))
        }
        ComfyUIMessage::Executing(data) => {
            tracing::debug!(node = ?data.node, prompt_id = ?data.prompt_id, "Executing node");
            None
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id = ?data.prompt_id,
                node_id = ?data.node_id,
                error_type = ?data.exception_type,
                "Execution error",
            );
            Some(Err(UpscaleError::Execution(data.describe())))
        }
        other => {
            tracing::trace!(message = ?other, "Ignoring ComfyUI message");
            None
        }
    }
}
