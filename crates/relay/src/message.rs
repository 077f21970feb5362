//! Inbound frame classification and the server-log sink.

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;
use voxlink_core::AudioFrame;

/// One inbound websocket message, routed by its binary/text flag.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A text frame holding a JSON value.
    Control(Value),
    /// A text frame that is not JSON.
    Log(String),
    /// A binary frame. The whole payload is one frame of audio.
    Audio(AudioFrame),
}

impl InboundMessage {
    /// Classifies a websocket message. Transport-level frames yield `None`.
    ///
    /// Only the frame type decides between audio and text; a binary payload
    /// is never inspected, even if it happens to be valid JSON.
    pub fn classify(message: Message) -> Option<Self> {
        match message {
            Message::Binary(payload) => Some(Self::Audio(AudioFrame::from_bytes(payload))),
            Message::Text(text) => Some(match serde_json::from_str::<Value>(text.as_str()) {
                Ok(value) => Self::Control(value),
                Err(_) => Self::Log(text.as_str().to_owned()),
            }),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }
}

/// A text message from the server, as delivered to a [`ServerLogSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerLog {
    Json(Value),
    Opaque(String),
}

/// Destination for server text frames. Recording must not block.
pub trait ServerLogSink: Send + Sync {
    fn record(&self, entry: ServerLog);
}

/// Emits server log lines as `tracing` events under `voxlink::server`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl ServerLogSink for TracingLogSink {
    fn record(&self, entry: ServerLog) {
        match entry {
            ServerLog::Json(value) => info!(target: "voxlink::server", %value, "server message"),
            ServerLog::Opaque(line) => info!(target: "voxlink::server", %line, "server log line"),
        }
    }
}
