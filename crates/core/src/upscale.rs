//! Upscale job policy, progress statuses and the failure taxonomy.
//!
//! The retry and deadline values are policy choices rather than a backend
//! contract, so they live in [`UpscalePolicy`] and can be overridden at
//! startup.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Policy defaults
// ---------------------------------------------------------------------------

/// Target resolution used when the caller does not pick one.
pub const DEFAULT_RESOLUTION: u32 = 4000;
/// Attempts the result resolver makes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Delay before every resolver attempt after the first.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Hard deadline for the event loop, measured from channel opening.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

/// Timing policy for a single upscale invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpscalePolicy {
    /// Maximum number of result-store lookups after completion.
    pub max_attempts: u32,
    /// Fixed delay between result-store lookups.
    pub retry_delay: Duration,
    /// Time allowed between opening the event channel and a terminal event.
    pub deadline: Duration,
}

impl Default for UpscalePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// Reject a zero or negative resolution coming from an untyped source.
pub fn validate_resolution(value: i64) -> Result<NonZeroU32, CoreError> {
    u32::try_from(value)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "resolution must be a positive integer, got {value}"
            ))
        })
}

// ---------------------------------------------------------------------------
// Progress statuses
// ---------------------------------------------------------------------------

/// Human-facing status updates emitted while a job runs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum UpscaleStatus {
    Uploading,
    Starting,
    Processing,
    Progress { percent: u8 },
}

impl fmt::Display for UpscaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploading => f.write_str("Uploading image..."),
            Self::Starting => f.write_str("Starting upscale..."),
            Self::Processing => f.write_str("Processing..."),
            Self::Progress { percent } => write!(f, "Processing... {percent}%"),
        }
    }
}

/// `round(value / max * 100)`, clamped to `0..=100`. A non-positive `max`
/// yields 0.
pub fn progress_percent(value: i64, max: i64) -> u8 {
    if max <= 0 {
        return 0;
    }
    let percent = (value as f64 / max as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Classification of an upscale failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpscaleErrorKind {
    Upload,
    Submission,
    Channel,
    Execution,
    OutputNotFound,
    Timeout,
}

/// Terminal failure of one upscale invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpscaleError {
    #[error("Failed to upload image: {0}")]
    Upload(String),

    #[error("Failed to queue upscale prompt: {0}")]
    Submission(String),

    #[error("Event channel failed: {0}")]
    Channel(String),

    #[error("Upscale execution failed: {0}")]
    Execution(String),

    #[error("Output not found after {attempts} attempts")]
    OutputNotFound { attempts: u32 },

    #[error("Upscale timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

impl UpscaleError {
    pub fn kind(&self) -> UpscaleErrorKind {
        match self {
            Self::Upload(_) => UpscaleErrorKind::Upload,
            Self::Submission(_) => UpscaleErrorKind::Submission,
            Self::Channel(_) => UpscaleErrorKind::Channel,
            Self::Execution(_) => UpscaleErrorKind::Execution,
            Self::OutputNotFound { .. } => UpscaleErrorKind::OutputNotFound,
            Self::Timeout(_) => UpscaleErrorKind::Timeout,
        }
    }
}
