//! Error types for the output module.

use panorama_ipc::FrameSize;
use panorama_media::MediaError;
use thiserror::Error;

/// Errors that can occur while opening or writing an output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Target could not be parsed.
    #[error("Invalid output target: {0}")]
    InvalidTarget(String),

    /// No built-in writer handles this target.
    #[error("Unsupported output target '{target}' ({container})")]
    UnsupportedTarget { target: String, container: String },

    /// Writer used before `open`.
    #[error("Writer is not open")]
    NotOpen,

    /// Writer opened twice.
    #[error("Writer is already open")]
    AlreadyOpen,

    /// Video frame does not match the configured output size.
    #[error("Frame is {actual}, output expects {expected}")]
    FrameSize {
        expected: FrameSize,
        actual: FrameSize,
    },

    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Reconnect exhausted.
    #[error("Reconnect attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    /// Channel disconnected.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// Frame could not be serialized.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
