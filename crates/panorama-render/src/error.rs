//! Error types for the render module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing or running a render backend.
#[derive(Debug, Error)]
pub enum RenderError {
    /// `render` called before a successful `prepare`.
    #[error("Render backend not prepared")]
    NotPrepared,

    /// Geometry configuration is missing or unusable.
    #[error("Invalid render configuration: {0}")]
    Config(String),

    /// Remap table could not be decoded.
    #[error("Invalid remap table {path}: {message}")]
    InvalidTable { path: PathBuf, message: String },

    /// Wrong number of source frames.
    #[error("Expected {expected} source frames, got {actual}")]
    SourceCount { expected: usize, actual: usize },

    /// A source frame does not match the prepared layout.
    #[error("Source frame {index} does not match the prepared size")]
    SourceFormat { index: usize },

    /// Destination buffer has the wrong size.
    #[error("Destination buffer size mismatch: expected {expected}, got {actual}")]
    DestinationSize { expected: usize, actual: usize },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
