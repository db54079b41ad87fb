//! Scripted gateway and event channel for driving the orchestrator without
//! a backend.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use upscale_comfyui::api::{ComfyUIApiError, ImageUpload};
use upscale_comfyui::events::{ChannelEvent, EventChannel};
use upscale_comfyui::gateway::{BackendGateway, GatewayError, StoredImage};
use upscale_comfyui::history::{ArtifactDescriptor, NodeOutput, OutputManifest};
use upscale_comfyui::messages::{parse_message, ParsedMessage};
use upscale_comfyui::workflow::JobGraph;

pub const JOB_ID: &str = "prompt-1";
pub const CLIENT_ID: &str = "6f1c2d3e-0000-4000-8000-000000000001";

/// What the channel does once its script runs out.
#[derive(Debug, Clone, Copy)]
pub enum AfterScript {
    /// Report end-of-stream.
    Close,
    /// Never yield again.
    Hang,
}

/// Reply to one `fetch_job_outputs` call.
#[derive(Debug, Clone)]
pub enum OutputsReply {
    Absent,
    Empty,
    Failure,
    File(&'static str),
}

pub struct ScriptedChannel {
    events: VecDeque<ChannelEvent>,
    after: AfterScript,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl EventChannel for ScriptedChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        match self.after {
            AfterScript::Close => None,
            AfterScript::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedGateway {
    fail_upload: bool,
    fail_submit: bool,
    fail_channel: bool,
    events: Mutex<Option<(Vec<ChannelEvent>, AfterScript)>>,
    outputs: Mutex<VecDeque<OutputsReply>>,
    pub submitted: Mutex<Vec<(serde_json::Value, String)>>,
    pub opened_for: Mutex<Vec<String>>,
    pub fetch_calls: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            fail_upload: false,
            fail_submit: false,
            fail_channel: false,
            events: Mutex::new(Some((Vec::new(), AfterScript::Hang))),
            outputs: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            opened_for: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn failing_channel(mut self) -> Self {
        self.fail_channel = true;
        self
    }

    pub fn with_events(self, events: Vec<ChannelEvent>, after: AfterScript) -> Self {
        *self.events.lock().unwrap() = Some((events, after));
        self
    }

    pub fn with_outputs(self, replies: Vec<OutputsReply>) -> Self {
        *self.outputs.lock().unwrap() = replies.into();
        self
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

fn upstream_failure(body: &str) -> GatewayError {
    GatewayError::Api(ComfyUIApiError::ApiError {
        status: 500,
        body: body.to_string(),
    })
}

#[async_trait]
impl BackendGateway for ScriptedGateway {
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, GatewayError> {
        if self.fail_upload {
            return Err(upstream_failure("disk full"));
        }
        Ok(StoredImage {
            name: image.file_name.clone(),
            subfolder: String::new(),
        })
    }

    async fn submit(&self, graph: &JobGraph, client_id: &str) -> Result<String, GatewayError> {
        if self.fail_submit {
            return Err(upstream_failure("invalid prompt"));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((graph.to_prompt(), client_id.to_string()));
        Ok(JOB_ID.to_string())
    }

    async fn open_event_channel(
        &self,
        client_id: &str,
    ) -> Result<Box<dyn EventChannel>, GatewayError> {
        if self.fail_channel {
            return Err(upstream_failure("websocket refused"));
        }
        self.opened_for.lock().unwrap().push(client_id.to_string());
        let (events, after) = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("event channel opened twice");
        Ok(Box::new(ScriptedChannel {
            events: events.into(),
            after,
            closed: false,
            closes: Arc::clone(&self.closes),
        }))
    }

    async fn fetch_job_outputs(
        &self,
        _job_id: &str,
    ) -> Result<Option<OutputManifest>, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OutputsReply::Absent);
        match reply {
            OutputsReply::Absent => Ok(None),
            OutputsReply::Empty => Ok(Some(OutputManifest::default())),
            OutputsReply::Failure => Err(upstream_failure("history unavailable")),
            OutputsReply::File(name) => Ok(Some(manifest_with(name))),
        }
    }
}

pub fn manifest_with(filename: &str) -> OutputManifest {
    let mut nodes = BTreeMap::new();
    nodes.insert(
        "10".to_string(),
        NodeOutput {
            images: vec![ArtifactDescriptor {
                filename: filename.to_string(),
                subfolder: String::new(),
                kind: Some("output".to_string()),
            }],
        },
    );
    OutputManifest(nodes)
}

/// Build a channel event from a raw ComfyUI JSON frame.
pub fn frame(text: &str) -> ChannelEvent {
    match parse_message(text) {
        Ok(ParsedMessage::Known(msg)) => ChannelEvent::Message(msg),
        Ok(ParsedMessage::Unrecognised(kind)) => panic!("unrecognised test frame {kind}"),
        Err(e) => ChannelEvent::Malformed {
            raw: text.to_string(),
            error: e.to_string(),
        },
    }
}

pub fn progress(value: i64, max: i64) -> ChannelEvent {
    frame(&format!(
        r#"{{"type":"progress","data":{{"value":{value},"max":{max}}}}}"#
    ))
}

pub fn executing(node: Option<&str>, prompt_id: &str) -> ChannelEvent {
    let node = node.map_or("null".to_string(), |n| format!("\"{n}\""));
    frame(&format!(
        r#"{{"type":"executing","data":{{"node":{node},"prompt_id":"{prompt_id}"}}}}"#
    ))
}

pub fn execution_error(message: &str) -> ChannelEvent {
    frame(&format!(
        r#"{{"type":"execution_error","data":{{"prompt_id":"{JOB_ID}","node_id":"11","exception_type":"RuntimeError","exception_message":"{message}"}}}}"#
    ))
}

pub fn image() -> ImageUpload {
    ImageUpload {
        bytes: vec![0x89, b'P', b'N', b'G'],
        file_name: "photo.png".to_string(),
        content_type: Some("image/png".to_string()),
    }
}
