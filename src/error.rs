//! Error types for handoff-pipe.

use thiserror::Error;

/// Main error type for all pipe operations.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// I/O error from the native pipe (create, open, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Control message bytes accompanying a descriptor are not UTF-8.
    #[error("Control message is not valid UTF-8: {0}")]
    ControlUtf8(#[from] std::str::Utf8Error),

    /// Control message accompanying a descriptor is not valid JSON.
    #[error("Malformed control message: {0}")]
    ControlJson(#[from] serde_json::Error),

    /// Protocol error (truncated ancillary data, missing control bytes, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation requires an open pipe.
    #[error("Pipe is not open")]
    NotOpen,

    /// `create`/`open` called on a pipe that is already open.
    #[error("Pipe is already open")]
    AlreadyOpen,
}

impl HandoffError {
    /// Whether this error means sender and receiver disagree on the
    /// handle exchange and the channel should be torn down.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            HandoffError::ControlUtf8(_) | HandoffError::ControlJson(_) | HandoffError::Protocol(_)
        )
    }
}

/// Result type alias using HandoffError.
pub type Result<T> = std::result::Result<T, HandoffError>;
