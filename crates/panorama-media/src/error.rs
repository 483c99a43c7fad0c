//! Error types for the media module.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Container does not start with the expected magic bytes.
    #[error("Not a panorama frame container")]
    BadMagic,

    /// A record ended before its declared length.
    #[error("Truncated frame record")]
    Truncated,

    /// Unknown media kind or format tag.
    #[error("Unknown format tag: {0}")]
    UnknownFormat(u8),

    /// Payload length does not match the frame description.
    #[error("Frame payload size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// End-of-stream sentinels cannot be serialized.
    #[error("Cannot encode an end-of-stream frame")]
    EndOfStreamFrame,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
