use std::path::PathBuf;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::protocol::MAX_LINE_BYTES;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Socket setup error: {0}")]
    Setup(String),

    #[error("Unsupported protocol version {found} (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid project id: {0}")]
    InvalidProject(i64),

    #[error("Message exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Server not running")]
    NotRunning,

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Client not connected")]
    NotConnected,

    #[error("Client already listening")]
    AlreadyListening,

    #[error("Client closed")]
    Closed,

    #[error("Timed out connecting to {}", .0.display())]
    ConnectTimeout(PathBuf),

    #[error("Timed out waiting for {0} reply")]
    ReplyTimeout(&'static str),
}

impl From<LinesCodecError> for EventsError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => EventsError::LineTooLong(MAX_LINE_BYTES),
            LinesCodecError::Io(e) => EventsError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, EventsError>;
