//! Result resolver: polls the backend's result store after completion.
//!
//! The completion event can arrive before the history endpoint records the
//! job's outputs, so lookups are retried with a fixed delay.

use upscale_core::upscale::{UpscaleError, UpscalePolicy};

use crate::gateway::BackendGateway;

/// Resolve the filename of the first artifact produced by `job_id`.
///
/// Makes up to `policy.max_attempts` lookups, sleeping `policy.retry_delay`
/// before each one after the first. Fetch errors and empty manifests are
/// both retried.
pub async fn resolve_output_filename(
    gateway: &dyn BackendGateway,
    job_id: &str,
    policy: &UpscalePolicy,
) -> Result<String, UpscaleError> {
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.retry_delay).await;
        }

        match gateway.fetch_job_outputs(job_id).await {
            Ok(Some(manifest)) => {
                if let Some(artifact) = manifest.first_artifact() {
                    tracing::info!(
                        prompt_id = job_id,
                        attempt,
                        filename = %artifact.filename,
                        "Resolved output artifact",
                    );
                    return Ok(artifact.filename.clone());
                }
                tracing::debug!(prompt_id = job_id, attempt, "Outputs recorded but empty");
            }
            Ok(None) => {
                tracing::debug!(prompt_id = job_id, attempt, "Outputs not recorded yet");
            }
            Err(e) => {
                tracing::warn!(
                    prompt_id = job_id,
                    attempt,
                    error = %e,
                    "Failed to fetch job outputs",
                );
            }
        }
    }

    tracing::warn!(prompt_id = job_id, attempts, "Output not found after retries");
    Err(UpscaleError::OutputNotFound { attempts })
}
