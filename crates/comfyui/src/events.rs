//! Transport-agnostic event channel consumed by the orchestrator.
//!
//! The WebSocket implementation lives in [`crate::channel`]; tests script
//! their own [`EventChannel`] to drive the event loop without a network.

use async_trait::async_trait;

use crate::messages::ComfyUIMessage;

/// One item read from an event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A recognised backend message.
    Message(ComfyUIMessage),
    /// A frame that could not be decoded. Carries the raw text and the
    /// decoder's complaint for logging.
    Malformed { raw: String, error: String },
    /// The transport itself failed.
    Error(String),
}

/// Push-notification stream scoped to one client id.
#[async_trait]
pub trait EventChannel: Send {
    /// Next event in arrival order, or `None` once the channel has closed.
    ///
    /// Must be cancel-safe: the orchestrator polls it inside
    /// `tokio::select!` alongside its deadline.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the channel. Further calls to `next_event` return `None`.
    async fn close(&mut self);
}
