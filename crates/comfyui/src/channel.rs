//! WebSocket-backed [`EventChannel`].
//!
//! Reads raw frames from a ComfyUI connection and turns each text frame
//! into a [`ChannelEvent`]. Binary frames (preview images), control frames
//! and unrecognised message kinds are skipped.
//!
//! A text frame that is not valid UTF-8 is reported as malformed. The
//! underlying stream cannot be read past such a frame, so the channel
//! subscribes again under the same client id before the next read.

use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::client::{ComfyUIClient, ComfyUIConnection, ComfyUIStream};
use crate::events::{ChannelEvent, EventChannel};
use crate::messages::{parse_message, ParsedMessage};

/// Placeholder payload recorded for frames that could not be decoded.
const INVALID_UTF8_RAW: &str = "<invalid utf-8>";

/// Event channel over a live ComfyUI WebSocket.
pub struct WsEventChannel {
    client: ComfyUIClient,
    client_id: String,
    ws_stream: ComfyUIStream,
    /// The current stream stopped at an undecodable frame.
    stale: bool,
    closed: bool,
}

impl WsEventChannel {
    pub fn new(client: ComfyUIClient, conn: ComfyUIConnection) -> Self {
        Self {
            client,
            client_id: conn.client_id,
            ws_stream: conn.ws_stream,
            stale: false,
            closed: false,
        }
    }

    /// Replace a stream that stopped at an undecodable frame.
    async fn resubscribe(&mut self) -> Result<(), String> {
        let conn = self
            .client
            .connect(&self.client_id)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(client_id = %self.client_id, "Resubscribed to ComfyUI events");
        self.ws_stream = conn.ws_stream;
        self.stale = false;
        Ok(())
    }
}

#[async_trait]
impl EventChannel for WsEventChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }

        if self.stale {
            if let Err(e) = self.resubscribe().await {
                tracing::error!(client_id = %self.client_id, error = %e, "ComfyUI resubscribe failed");
                self.closed = true;
                return Some(ChannelEvent::Error(e));
            }
        }

        while let Some(frame) = self.ws_stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = decode_text(&self.client_id, &text) {
                        return Some(event);
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::trace!(client_id = %self.client_id, "Ignoring binary message (preview image)");
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(client_id = %self.client_id, ?frame, "ComfyUI WebSocket closed");
                    break;
                }
                Err(WsError::Utf8) => {
                    self.stale = true;
                    return Some(ChannelEvent::Malformed {
                        raw: INVALID_UTF8_RAW.to_string(),
                        error: WsError::Utf8.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(client_id = %self.client_id, error = %e, "WebSocket receive error");
                    self.closed = true;
                    return Some(ChannelEvent::Error(e.to_string()));
                }
            }
        }

        self.closed = true;
        None
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.stale {
            // The stream already ended at the bad frame; dropping it is enough.
            return;
        }
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close failed");
        }
    }
}

/// Map one text frame to an event, or `None` when it should be skipped.
fn decode_text(client_id: &str, text: &str) -> Option<ChannelEvent> {
    match parse_message(text) {
        Ok(ParsedMessage::Known(msg)) => Some(ChannelEvent::Message(msg)),
        Ok(ParsedMessage::Unrecognised(kind)) => {
            tracing::trace!(client_id, kind = %kind, "Skipping unrecognised ComfyUI message");
            None
        }
        Err(e) => Some(ChannelEvent::Malformed {
            raw: text.to_string(),
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::messages::ComfyUIMessage;

    #[test]
    fn known_text_becomes_message() {
        let event = decode_text("c", r#"{"type":"progress","data":{"value":1,"max":4}}"#);
        assert_matches!(event, Some(ChannelEvent::Message(ComfyUIMessage::Progress(_))));
    }

    #[test]
    fn unrecognised_text_is_skipped() {
        assert_eq!(decode_text("c", r#"{"type":"crystools.monitor","data":{}}"#), None);
    }

    #[test]
    fn garbage_text_is_malformed() {
        let event = decode_text("c", "{oops");
        assert_matches!(event, Some(ChannelEvent::Malformed { raw, .. }) if raw == "{oops");
    }
}
