//! Remote Resource Model
//!
//! Request and response shapes for the agent control API. Entities here are
//! transient: an [`Agent`] and its [`Listener`] live for one session and are
//! deleted (listener first) when the session ends.
//!
//! Option bags are typed for the fields voxlink understands. Anything else is
//! kept in the flattened `extra` map and sent to the server verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `GET /models` response: model name mapped to server-defined metadata.
///
/// Entries keep the order the server sent them in, so selection is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog(Map<String, Value>);

impl ModelCatalog {
    pub fn new(models: Map<String, Value>) -> Self {
        Self(models)
    }

    /// Returns the first model name containing `pattern`, in response order.
    pub fn select(&self, pattern: &str) -> Option<&str> {
        self.0
            .keys()
            .find(|name| name.contains(pattern))
            .map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn metadata(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options sent with agent creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    /// Sampling temperature for the agent's model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Unrecognized options, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options sent when activating an agent for websocket transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenOptions {
    /// Ask the server to stream its log lines over the socket as text frames.
    #[serde(default = "default_stream_log")]
    pub stream_log: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_stream_log() -> bool {
    true
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            stream_log: default_stream_log(),
            extra: Map::new(),
        }
    }
}

/// Options sent with a room join. Nothing is recognized; all fields pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinOptions {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /agents`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub model_name: String,
    pub prompt: String,
    pub options: AgentOptions,
}

/// Body of `POST /agents/{agentId}/listen`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenRequest {
    pub websocket: bool,
    pub options: ListenOptions,
}

impl ListenRequest {
    pub fn websocket(options: ListenOptions) -> Self {
        Self {
            websocket: true,
            options,
        }
    }
}

/// Body of `POST /rooms/{listenerId}/join`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinRoomRequest {
    pub options: JoinOptions,
}

/// The only field voxlink reads from create/activate responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResourceRef {
    pub id: String,
}

/// A server-side conversational agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: String,
    pub model_name: String,
    pub prompt: String,
    pub options: AgentOptions,
}

/// A server-side activation of an [`Agent`] for websocket transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    pub id: String,
    pub agent_id: String,
    pub options: ListenOptions,
}

/// The `POST /rooms/{listenerId}/join` response.
///
/// Lifetime is bound to the listener; there is no delete call for it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinInfo {
    /// Present only when the room carries a media socket.
    #[serde(default)]
    pub audio_socket: Option<AudioSocket>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where and how to open the duplex audio websocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioSocket {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AudioSocket {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            extra: Map::new(),
        }
    }
}
