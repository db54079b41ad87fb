//! ComfyUI integration and the upscale job protocol.
//!
//! Provides the HTTP and WebSocket clients, typed message parsing, the
//! fixed upscale workflow, the [`gateway::BackendGateway`] seam, and the
//! orchestrator that drives a job from upload to a retrievable output.

pub mod api;
pub mod channel;
pub mod client;
pub mod events;
pub mod gateway;
pub mod history;
pub mod messages;
pub mod orchestrator;
pub mod resolver;
pub mod workflow;
