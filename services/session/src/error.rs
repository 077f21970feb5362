use voxlink_core::{ControlError, DeviceError};
use voxlink_relay::RelayError;

/// Why a session failed to come up or ended early.
///
/// Setup errors carry the failing step and the resource id it acted on.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("listing models failed")]
    ModelList(#[source] ControlError),
    #[error("no model matching `{pattern}` among {available} listed models")]
    ModelNotFound { pattern: String, available: usize },
    #[error("creating agent with model `{model}` failed")]
    AgentCreation {
        model: String,
        #[source]
        source: ControlError,
    },
    #[error("activating agent {agent_id} for websocket transport failed")]
    Activation {
        agent_id: String,
        #[source]
        source: ControlError,
    },
    #[error("joining room for listener {listener_id} failed")]
    RoomJoin {
        listener_id: String,
        #[source]
        source: ControlError,
    },
    #[error("audio relay failed")]
    Relay(#[source] RelayError),
    #[error("audio device failed")]
    Device(#[from] DeviceError),
}

impl SessionError {
    /// The lifecycle step the error belongs to.
    pub fn step(&self) -> &'static str {
        match self {
            SessionError::ModelList(_) | SessionError::ModelNotFound { .. } => "select_model",
            SessionError::AgentCreation { .. } => "create_agent",
            SessionError::Activation { .. } => "activate_listener",
            SessionError::RoomJoin { .. } => "join_room",
            SessionError::Relay(_) => "relay",
            SessionError::Device(_) => "audio_device",
        }
    }
}

/// Device failures inside the relay are reported against the device, not the socket.
impl From<RelayError> for SessionError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Device(e) => SessionError::Device(e),
            other => SessionError::Relay(other),
        }
    }
}

/// Renders an error with its whole `source` chain on one line.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
