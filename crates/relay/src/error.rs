use tokio_tungstenite::tungstenite;
use voxlink_core::DeviceError;

/// Terminal failures of the duplex relay. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid audio socket descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("websocket handshake with {url} failed")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("websocket handshake with {0} timed out")]
    ConnectTimedOut(String),
    #[error("websocket failed during the session")]
    Socket(#[source] tungstenite::Error),
    #[error("websocket closed without a close frame")]
    Disconnected,
    #[error("audio device failed in the relay")]
    Device(#[from] DeviceError),
    #[error("relay did not shut down within {0:?}")]
    CloseTimedOut(std::time::Duration),
    #[error("relay task failed: {0}")]
    Task(String),
}
