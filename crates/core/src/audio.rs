//! Audio Device Bridge
//!
//! Local audio enters and leaves a session as [`AudioFrame`]s: raw PCM, mono,
//! 16-bit signed little-endian at 48 kHz. Backends implement [`CaptureDevice`]
//! and [`PlaybackDevice`]; [`AudioBridge`] owns one of each and adds the
//! guarantees the session relies on (idempotent stop/close and bounded waits).

use async_trait::async_trait;
use bytes::Bytes;
use std::{future::Future, time::Duration};
use tracing::debug;

/// Sample rate of every frame crossing the bridge.
pub const SAMPLE_RATE: u32 = 48_000;
/// Channel count of every frame crossing the bridge.
pub const CHANNELS: u16 = 1;

const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(2);

/// An immutable buffer of PCM16 LE samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    /// Wraps raw bytes exactly as received. The payload is not validated.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self(Bytes::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Decodes the payload as i16 samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.0
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Errors raised by capture or playback devices.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device cannot take more data right now. Callers may drop the frame.
    #[error("playback device is not ready")]
    NotReady,
    #[error("audio device unavailable: {0}")]
    Unavailable(String),
    #[error("audio backend error: {0}")]
    Backend(String),
    #[error("audio device did not finish `{0}` in time")]
    Timeout(&'static str),
}

/// Receives captured frames, in capture order, on the device's own schedule.
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// A source of captured audio.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Starts delivering frames to `on_frame` until [`stop`](Self::stop) is called.
    async fn start(&mut self, on_frame: FrameSink) -> Result<(), DeviceError>;

    /// Stops delivery. After this returns, `on_frame` is not called again.
    async fn stop(&mut self) -> Result<(), DeviceError>;
}

/// A sink for audio to be played.
#[async_trait]
pub trait PlaybackDevice: Send {
    /// Queues one frame. Returns [`DeviceError::NotReady`] if it cannot be taken.
    async fn write(&mut self, frame: AudioFrame) -> Result<(), DeviceError>;

    /// Plays out what is already queued, then releases the device.
    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// Owns the capture/playback pair for one session.
pub struct AudioBridge {
    capture: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackDevice>,
    capturing: bool,
    playback_open: bool,
    timeout: Duration,
}

impl AudioBridge {
    pub fn new(capture: Box<dyn CaptureDevice>, playback: Box<dyn PlaybackDevice>) -> Self {
        Self {
            capture,
            playback,
            capturing: false,
            playback_open: true,
            timeout: DEFAULT_DEVICE_TIMEOUT,
        }
    }

    /// A bridge with no hardware behind it.
    pub fn null() -> Self {
        Self::new(Box::new(NullCapture), Box::new(NullPlayback))
    }

    /// Sets the bound applied to every device call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn is_playback_open(&self) -> bool {
        self.playback_open
    }

    pub async fn start_capture(&mut self, on_frame: FrameSink) -> Result<(), DeviceError> {
        if self.capturing {
            return Ok(());
        }
        bounded(self.timeout, "start_capture", self.capture.start(on_frame)).await?;
        self.capturing = true;
        Ok(())
    }

    /// Stops capture. A no-op if capture is not running.
    pub async fn stop_capture(&mut self) -> Result<(), DeviceError> {
        if !self.capturing {
            return Ok(());
        }
        // A device that failed to stop is not retried; it is released on drop.
        self.capturing = false;
        bounded(self.timeout, "stop_capture", self.capture.stop()).await
    }

    pub async fn write_playback(&mut self, frame: AudioFrame) -> Result<(), DeviceError> {
        if !self.playback_open {
            return Err(DeviceError::NotReady);
        }
        bounded(self.timeout, "write_playback", self.playback.write(frame)).await
    }

    /// Drains and closes playback. A no-op once closed.
    pub async fn close_playback(&mut self) -> Result<(), DeviceError> {
        if !self.playback_open {
            return Ok(());
        }
        self.playback_open = false;
        bounded(self.timeout, "close_playback", self.playback.close()).await
    }
}

async fn bounded<F>(timeout: Duration, op: &'static str, fut: F) -> Result<(), DeviceError>
where
    F: Future<Output = Result<(), DeviceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            debug!(op, ?timeout, "device call timed out");
            Err(DeviceError::Timeout(op))
        }
    }
}

/// Capture that never produces a frame.
#[derive(Debug, Default)]
pub struct NullCapture;

#[async_trait]
impl CaptureDevice for NullCapture {
    async fn start(&mut self, _on_frame: FrameSink) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Playback that discards every frame.
#[derive(Debug, Default)]
pub struct NullPlayback;

#[async_trait]
impl PlaybackDevice for NullPlayback {
    async fn write(&mut self, _frame: AudioFrame) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
