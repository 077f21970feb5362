//! Voxlink Session Library Crate
//!
//! Runs one voice-agent session end to end: provisions an agent through the
//! control API, relays microphone and speaker audio over the room's websocket,
//! and tears everything down again. The `voxlink` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod report;

pub use controller::{SessionController, SessionRequest};
pub use error::SessionError;
pub use report::{SessionResult, StepOutcome, TeardownReport, TeardownStep};
