//! Duplex Audio Relay
//!
//! Bridges a local [`AudioBridge`](voxlink_core::AudioBridge) and the media
//! websocket returned by a room join. Captured audio goes out as binary
//! messages in capture order; inbound binary messages are played back and
//! inbound text is handed to a [`ServerLogSink`].
//!
//! - `message`: classification of inbound websocket frames.
//! - `relay`: connection, the relay task, and its handle.

mod error;
pub mod message;
mod relay;

pub use error::RelayError;
pub use message::{InboundMessage, ServerLog, ServerLogSink, TracingLogSink};
pub use relay::{DuplexRelay, RelayConfig, RelayHandle, RelayStats};
