//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Kinds the upscale flow cares about
//! (and a handful of common ones it deliberately ignores) are decoded into
//! [`ComfyUIMessage`]; anything else is reported as unrecognised so the
//! caller can skip it without treating it as corruption.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Known ComfyUI WebSocket message kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    Status(StatusData),
    /// A prompt has started executing.
    ExecutionStart(PromptData),
    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),
    /// A node is executing, or the prompt finished when `node` is `None`.
    Executing(ExecutingData),
    /// Step-level progress from a long-running node.
    Progress(ProgressData),
    /// A node finished and produced output.
    Executed(ExecutedData),
    /// The prompt finished without error (newer servers).
    ExecutionSuccess(PromptData),
    /// Execution failed with an error.
    ExecutionError(ErrorData),
}

/// Outcome of decoding one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    Known(ComfyUIMessage),
    /// Well-formed envelope with a `type` this client does not handle.
    Unrecognised(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Queue status information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i64,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ExecutingData {
    /// True when this is the end-of-prompt marker for `prompt_id`.
    pub fn finishes(&self, prompt_id: &str) -> bool {
        self.node.is_none() && self.prompt_id.as_deref() == Some(prompt_id)
    }
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    pub value: i64,
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages. Servers differ in which fields
/// they populate, so all of them are optional.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ErrorData {
    pub prompt_id: Option<String>,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub exception_message: Option<String>,
    pub exception_type: Option<String>,
}

impl ErrorData {
    /// Best available human-readable description of the failure.
    pub fn describe(&self) -> String {
        match (&self.exception_type, &self.exception_message) {
            (Some(kind), Some(message)) => format!("{kind}: {}", message.trim()),
            (None, Some(message)) => message.trim().to_string(),
            (Some(kind), None) => kind.clone(),
            (None, None) => "backend reported an execution error".to_string(),
        }
    }
}

/// Parse a ComfyUI WebSocket text message.
///
/// Returns `Err` for invalid JSON, a missing `type`, or a known `type`
/// whose payload does not match.
pub fn parse_message(text: &str) -> Result<ParsedMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let data = envelope.data;

    let message = match envelope.kind.as_str() {
        "status" => ComfyUIMessage::Status(decode(data)?),
        "execution_start" => ComfyUIMessage::ExecutionStart(decode(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(decode(data)?),
        "executing" => ComfyUIMessage::Executing(decode(data)?),
        "progress" => ComfyUIMessage::Progress(decode(data)?),
        "executed" => ComfyUIMessage::Executed(decode(data)?),
        "execution_success" => ComfyUIMessage::ExecutionSuccess(decode(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(decode(data)?),
        _ => return Ok(ParsedMessage::Unrecognised(envelope.kind)),
    };

    Ok(ParsedMessage::Known(message))
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}
