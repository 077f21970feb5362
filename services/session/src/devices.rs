//! cpal-backed capture and playback.
//!
//! A cpal `Stream` is not `Send`, so each open device lives on its own thread
//! that builds the stream, reports readiness, and parks until told to stop.

use async_trait::async_trait;
use cpal::{
    BufferSize, Device, SampleRate, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::{sync::mpsc, thread, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use voxlink_core::{
    AudioFrame, CHANNELS, CaptureDevice, DeviceError, FrameSink, PlaybackDevice, SAMPLE_RATE,
};

/// Two seconds of queued playback.
const PLAYBACK_CAPACITY: usize = SAMPLE_RATE as usize * 2;
const DRAIN_POLL: Duration = Duration::from_millis(10);

fn stream_config() -> StreamConfig {
    StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    }
}

fn find_device(name: Option<&str>, input: bool) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    let kind = if input { "input" } else { "output" };
    let Some(name) = name else {
        let default = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return default.ok_or_else(|| DeviceError::Unavailable(format!("no default {kind} device")));
    };

    let devices = if input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| DeviceError::Backend(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(DeviceError::Unavailable(format!("no {kind} device named `{name}`")))
}

/// The thread that keeps a stream alive.
struct StreamWorker {
    stop_tx: mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl StreamWorker {
    /// Spawns a thread that builds a stream with `build` and holds it until stopped.
    async fn spawn<B>(name: &str, build: B) -> Result<Self, DeviceError>
    where
        B: FnOnce() -> Result<cpal::Stream, DeviceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| DeviceError::Backend(e.to_string()))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until a stop signal arrives or the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { stop_tx, thread }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Backend(format!("{name} thread exited early"))),
        }
    }

    async fn stop(self) -> Result<(), DeviceError> {
        let _ = self.stop_tx.send(());
        tokio::task::spawn_blocking(move || self.thread.join())
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))?
            .map_err(|_| DeviceError::Backend("audio thread panicked".to_string()))
    }
}

/// Microphone capture through cpal, delivering mono PCM16 at 48 kHz.
pub struct CpalCapture {
    device_name: Option<String>,
    worker: Option<StreamWorker>,
}

impl CpalCapture {
    /// Uses the named input device, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }
}

#[async_trait]
impl CaptureDevice for CpalCapture {
    async fn start(&mut self, mut on_frame: FrameSink) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device_name = self.device_name.clone();
        let worker = StreamWorker::spawn("voxlink-capture", move || {
            let device = find_device(device_name.as_deref(), true)?;
            info!(device = %device.name().unwrap_or_default(), "Opening input device.");
            device
                .build_input_stream(
                    &stream_config(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        on_frame(AudioFrame::from_samples(data));
                    },
                    |e| warn!(error = %e, "Input stream error."),
                    None,
                )
                .map_err(|e| DeviceError::Unavailable(e.to_string()))
        })
        .await?;
        self.worker = Some(worker);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        match self.worker.take() {
            Some(worker) => worker.stop().await,
            None => Ok(()),
        }
    }
}

/// Bounded sample queue between websocket writes and the output callback.
struct PlaybackQueue {
    producer: HeapProd<i16>,
}

impl PlaybackQueue {
    fn new(capacity: usize) -> (Self, HeapCons<i16>) {
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        (Self { producer }, consumer)
    }

    /// Queues the whole frame, or nothing if it does not fit.
    fn push(&mut self, frame: &AudioFrame) -> Result<(), DeviceError> {
        let samples: Vec<i16> = frame.samples().collect();
        if self.producer.vacant_len() < samples.len() {
            return Err(DeviceError::NotReady);
        }
        self.producer.push_slice(&samples);
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.producer.is_empty()
    }
}

/// Fills an output buffer from the queue, padding with silence.
fn fill_output(consumer: &mut HeapCons<i16>, out: &mut [i16]) {
    let written = consumer.pop_slice(out);
    out[written..].fill(0);
}

/// Speaker playback through cpal, consuming mono PCM16 at 48 kHz.
pub struct CpalPlayback {
    queue: PlaybackQueue,
    worker: Option<StreamWorker>,
}

impl CpalPlayback {
    /// Opens the named output device, or the host default when `None`.
    pub async fn open(device_name: Option<String>) -> Result<Self, DeviceError> {
        let (queue, mut consumer) = PlaybackQueue::new(PLAYBACK_CAPACITY);
        let worker = StreamWorker::spawn("voxlink-playback", move || {
            let device = find_device(device_name.as_deref(), false)?;
            info!(device = %device.name().unwrap_or_default(), "Opening output device.");
            device
                .build_output_stream(
                    &stream_config(),
                    move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        fill_output(&mut consumer, out)
                    },
                    |e| warn!(error = %e, "Output stream error."),
                    None,
                )
                .map_err(|e| DeviceError::Unavailable(e.to_string()))
        })
        .await?;
        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }
}

#[async_trait]
impl PlaybackDevice for CpalPlayback {
    async fn write(&mut self, frame: AudioFrame) -> Result<(), DeviceError> {
        if self.worker.is_none() {
            return Err(DeviceError::NotReady);
        }
        self.queue.push(&frame)
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        while !self.queue.is_drained() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        debug!("Playback queue drained.");
        worker.stop().await
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

/// Audio devices visible to the host, for the `devices` command.
#[derive(Debug, Default)]
pub struct DeviceListing {
    pub host: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
}

pub fn list_devices() -> Result<DeviceListing, DeviceError> {
    let host = cpal::default_host();
    let names = |devices: Vec<Device>| -> Vec<String> {
        devices.iter().filter_map(|d| d.name().ok()).collect()
    };
    Ok(DeviceListing {
        host: host.id().name().to_string(),
        inputs: names(
            host.input_devices()
                .map_err(|e| DeviceError::Backend(e.to_string()))?
                .collect(),
        ),
        outputs: names(
            host.output_devices()
                .map_err(|e| DeviceError::Backend(e.to_string()))?
                .collect(),
        ),
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_rejects_the_whole_frame() {
        let (mut queue, _consumer) = PlaybackQueue::new(4);
        queue.push(&AudioFrame::from_samples(&[1, 2, 3])).unwrap();

        let err = queue.push(&AudioFrame::from_samples(&[4, 5])).unwrap_err();
        assert!(matches!(err, DeviceError::NotReady));

        queue.push(&AudioFrame::from_samples(&[4])).unwrap();
        assert!(!queue.is_drained());
    }

    #[test]
    fn output_is_padded_with_silence() {
        let (mut queue, mut consumer) = PlaybackQueue::new(8);
        queue.push(&AudioFrame::from_samples(&[7, -7])).unwrap();

        let mut out = [99i16; 4];
        fill_output(&mut consumer, &mut out);
        assert_eq!(out, [7, -7, 0, 0]);
        assert!(queue.is_drained());
    }
}
