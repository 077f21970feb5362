//! Manages the media websocket for one session.
//!
//! Opening is split in two so the device bridge is never stranded by a failed
//! handshake: [`DuplexRelay::connect`] performs the handshake, and
//! [`DuplexRelay::start`] hands the bridge to a spawned relay task.

use crate::{
    error::RelayError,
    message::{InboundMessage, ServerLog, ServerLogSink},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::{JoinError, JoinHandle},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{Instrument, debug, error, info, warn};
use voxlink_core::{AudioBridge, AudioFrame, AudioSocket, DeviceError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Timeouts for the relay's connection lifecycle.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(3),
        }
    }
}

/// Frame counters reported when the relay shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_sent: u64,
    pub frames_played: u64,
    pub frames_dropped: u64,
    pub server_messages: u64,
}

/// A connected media websocket that has not started relaying yet.
pub struct DuplexRelay {
    url: String,
    stream: WsStream,
    close_timeout: Duration,
}

impl DuplexRelay {
    /// Performs the websocket handshake against `socket`.
    ///
    /// A token in the descriptor is sent as a bearer `Authorization` header.
    pub async fn connect(socket: &AudioSocket, config: &RelayConfig) -> Result<Self, RelayError> {
        let mut request = socket
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::InvalidDescriptor(e.to_string()))?;
        if let Some(token) = &socket.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RelayError::InvalidDescriptor(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) =
            match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(source)) => {
                    return Err(RelayError::Connect {
                        url: socket.url.clone(),
                        source,
                    });
                }
                Err(_) => return Err(RelayError::ConnectTimedOut(socket.url.clone())),
            };
        info!(url = %socket.url, "Connected to audio socket.");

        Ok(Self {
            url: socket.url.clone(),
            stream,
            close_timeout: config.close_timeout,
        })
    }

    /// Closes a relay that was never started, with a websocket close handshake.
    pub async fn close(mut self) -> Result<(), RelayError> {
        self.stream.close(None).await.map_err(RelayError::Socket)?;
        info!(url = %self.url, "Closed unstarted audio socket.");
        Ok(())
    }

    /// Starts capture and relaying on a background task.
    ///
    /// The bridge is owned by the task until the relay ends, and is handed
    /// back through [`RelayHandle::take_bridge`] after [`RelayHandle::close`].
    pub fn start(self, bridge: AudioBridge, sink: Arc<dyn ServerLogSink>) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let span = tracing::info_span!("relay", url = %self.url);
        let task = tokio::spawn(run_relay(self.stream, bridge, shutdown_rx, sink).instrument(span));
        RelayHandle {
            state: HandleState::Running {
                shutdown: shutdown_tx,
                task,
            },
            close_timeout: self.close_timeout,
            bridge: None,
            stats: RelayStats::default(),
        }
    }
}

/// What the relay task gives back when it ends.
struct RelayExit {
    bridge: AudioBridge,
    stats: RelayStats,
    result: Result<(), RelayError>,
}

enum HandleState {
    Running {
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<RelayExit>,
    },
    Finished(Result<RelayExit, JoinError>),
    Closed,
}

/// Control handle for a running relay.
///
/// Dropping the handle signals the task to shut down the same way
/// [`close`](Self::close) does, without waiting for it.
pub struct RelayHandle {
    state: HandleState,
    close_timeout: Duration,
    bridge: Option<AudioBridge>,
    stats: RelayStats,
}

impl RelayHandle {
    /// True until the task has ended, either on its own or through `close`.
    pub fn is_running(&self) -> bool {
        matches!(self.state, HandleState::Running { .. })
    }

    /// Resolves when the relay task ends on its own (socket error or peer close).
    ///
    /// Returns immediately if the task has already ended. Cancel safe.
    pub async fn terminated(&mut self) {
        if let HandleState::Running { task, .. } = &mut self.state {
            let joined = task.await;
            self.state = HandleState::Finished(joined);
        }
    }

    /// Stops capture, flushes captured frames, and closes the socket.
    ///
    /// Safe to call repeatedly; calls after the first return `Ok` with the
    /// final stats. If the task does not finish within the close timeout it
    /// is aborted and the bridge is released with it.
    pub async fn close(&mut self) -> Result<RelayStats, RelayError> {
        let joined = match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Closed => return Ok(self.stats),
            HandleState::Finished(joined) => joined,
            HandleState::Running { shutdown, mut task } => {
                let _ = shutdown.send(());
                match tokio::time::timeout(self.close_timeout, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        warn!(timeout = ?self.close_timeout, "Relay did not stop in time; aborted.");
                        return Err(RelayError::CloseTimedOut(self.close_timeout));
                    }
                }
            }
        };

        let exit = joined.map_err(|e| RelayError::Task(e.to_string()))?;
        self.bridge = Some(exit.bridge);
        self.stats = exit.stats;
        exit.result.map(|()| self.stats)
    }

    /// Hands the device bridge back once the relay has been closed.
    pub fn take_bridge(&mut self) -> Option<AudioBridge> {
        self.bridge.take()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

/// Why the relay loop stopped without an error.
enum Stop {
    Shutdown,
    PeerClosed,
}

async fn run_relay(
    stream: WsStream,
    mut bridge: AudioBridge,
    mut shutdown: oneshot::Receiver<()>,
    sink: Arc<dyn ServerLogSink>,
) -> RelayExit {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let mut stats = RelayStats::default();

    // Unbounded: the capture callback must neither block nor drop frames.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<AudioFrame>();
    let on_frame = Box::new(move |frame: AudioFrame| {
        let _ = frame_tx.send(frame);
    });
    if let Err(e) = bridge.start_capture(on_frame).await {
        error!(error = %e, "Capture failed to start.");
        let _ = ws_tx.close().await;
        return RelayExit {
            bridge,
            stats,
            result: Err(e.into()),
        };
    }
    info!("Relay running.");

    let stop = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(Stop::Shutdown),
            Some(frame) = frame_rx.recv() => {
                if let Err(e) = send_frame(&mut ws_tx, frame, &mut stats).await {
                    break Err(e);
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Server closed the audio socket.");
                    break Ok(Stop::PeerClosed);
                }
                Some(Ok(message)) => handle_inbound(message, &mut bridge, sink.as_ref(), &mut stats).await,
                Some(Err(e)) => break Err(RelayError::Socket(e)),
                None => break Err(RelayError::Disconnected),
            },
        }
    };

    if let Err(e) = bridge.stop_capture().await {
        warn!(error = %e, "Capture did not stop cleanly.");
    }

    let result = match stop {
        Ok(Stop::Shutdown) => {
            let mut flushed = Ok(());
            while let Ok(frame) = frame_rx.try_recv() {
                if let Err(e) = send_frame(&mut ws_tx, frame, &mut stats).await {
                    flushed = Err(e);
                    break;
                }
            }
            if let Err(e) = ws_tx.close().await {
                debug!(error = %e, "Close handshake did not complete.");
            }
            flushed
        }
        Ok(Stop::PeerClosed) => {
            let _ = ws_tx.close().await;
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay terminated.");
            Err(e)
        }
    };

    info!(
        sent = stats.frames_sent,
        played = stats.frames_played,
        dropped = stats.frames_dropped,
        server_messages = stats.server_messages,
        "Relay stopped."
    );
    RelayExit {
        bridge,
        stats,
        result,
    }
}

async fn send_frame(
    ws_tx: &mut WsSink,
    frame: AudioFrame,
    stats: &mut RelayStats,
) -> Result<(), RelayError> {
    ws_tx
        .send(Message::Binary(frame.into_bytes()))
        .await
        .map_err(RelayError::Socket)?;
    stats.frames_sent += 1;
    Ok(())
}

async fn handle_inbound(
    message: Message,
    bridge: &mut AudioBridge,
    sink: &dyn ServerLogSink,
    stats: &mut RelayStats,
) {
    match InboundMessage::classify(message) {
        Some(InboundMessage::Audio(frame)) => match bridge.write_playback(frame).await {
            Ok(()) => stats.frames_played += 1,
            Err(DeviceError::NotReady) => {
                stats.frames_dropped += 1;
                debug!("Playback not ready; frame dropped.");
            }
            Err(e) => {
                stats.frames_dropped += 1;
                warn!(error = %e, "Playback write failed; frame dropped.");
            }
        },
        Some(InboundMessage::Control(value)) => {
            stats.server_messages += 1;
            sink.record(ServerLog::Json(value));
        }
        Some(InboundMessage::Log(line)) => {
            stats.server_messages += 1;
            sink.record(ServerLog::Opaque(line));
        }
        None => {}
    }
}
