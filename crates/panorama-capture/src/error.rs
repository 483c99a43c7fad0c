//! Error types for the capture module.

use panorama_media::MediaError;
use thiserror::Error;

/// Errors that can occur while opening or reading a source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Source string is not a valid URL.
    #[error("Invalid source '{source_name}': {message}")]
    InvalidSource {
        source_name: String,
        message: String,
    },

    /// No reader handles this kind of source.
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// A query parameter could not be parsed.
    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    /// Reader used before `open`.
    #[error("Reader is not open")]
    NotOpen,

    /// Reader opened twice.
    #[error("Reader is already open")]
    AlreadyOpen,

    /// The source has no more frames.
    #[error("End of stream")]
    EndOfStream,

    /// The device stopped delivering frames.
    #[error("Capture device lost: {0}")]
    DeviceLost(String),

    /// Recorded frames could not be decoded.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
