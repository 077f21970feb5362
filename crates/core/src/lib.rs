//! Voxlink Core
//!
//! Shared building blocks for a voxlink session: the transient data model of the
//! remote agent API, the control-plane client used to provision and release
//! those resources, and the local audio device bridge that the relay drives.

pub mod audio;
pub mod control;
pub mod types;

pub use audio::{
    AudioBridge, AudioFrame, CHANNELS, CaptureDevice, DeviceError, FrameSink, NullCapture,
    NullPlayback, PlaybackDevice, SAMPLE_RATE,
};
pub use control::{ControlClient, ControlError, HttpControlClient};
pub use types::{
    Agent, AgentOptions, AudioSocket, CreateAgentRequest, JoinOptions, JoinRoomRequest,
    ListenOptions, ListenRequest, Listener, ModelCatalog, RoomJoinInfo,
};
