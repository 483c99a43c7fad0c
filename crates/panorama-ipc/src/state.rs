//! Subsystem lifecycle types.

use serde::{Deserialize, Serialize};

/// Independently opened parts of the panorama task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    /// Camera capture threads plus the synchronization thread.
    VideoDevices,

    /// Audio capture thread.
    AudioDevice,

    /// Compositing and post-processing threads.
    Stitch,

    /// Live-stream send thread.
    LiveStream,

    /// Segmented file-save thread.
    FileSave,

    /// Source-frames preview thread.
    SourcePreview,

    /// Stitched-frame preview thread.
    StitchedPreview,
}

impl Subsystem {
    /// Every subsystem, in teardown order.
    pub const ALL: [Subsystem; 7] = [
        Self::VideoDevices,
        Self::AudioDevice,
        Self::Stitch,
        Self::LiveStream,
        Self::FileSave,
        Self::SourcePreview,
        Self::StitchedPreview,
    ];

    /// Returns the display name for this subsystem.
    pub fn name(self) -> &'static str {
        match self {
            Self::VideoDevices => "Video sources",
            Self::AudioDevice => "Audio source",
            Self::Stitch => "Video stitch",
            Self::LiveStream => "Live stream",
            Self::FileSave => "File save",
            Self::SourcePreview => "Source preview",
            Self::StitchedPreview => "Stitched preview",
        }
    }
}

/// Lifecycle of a single subsystem.
///
/// `Unopened → Open → Stopped`, and `Stopped → Open` again on reopen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemState {
    /// Never opened.
    #[default]
    Unopened,

    /// Threads running.
    Open,

    /// Threads joined and flags reset.
    Stopped,
}

impl SubsystemState {
    /// Returns true while the subsystem's threads are running.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Reason the global finish flag was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// Finish explicitly requested.
    UserRequested,

    /// A camera read failed mid-stream.
    SourceReadFailed { index: usize, message: String },

    /// Synchronization observed an end-of-stream sentinel.
    SourceEnded { index: usize },

    /// The audio device read failed mid-stream.
    AudioReadFailed { message: String },

    /// The render operation failed.
    RenderFailed { message: String },

    /// Writing to the live stream failed.
    StreamWriteFailed { message: String },

    /// Writing a segment file failed.
    FileWriteFailed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Task finished by request".to_string(),
            Self::SourceReadFailed { index, message } => {
                format!("Video source {index} read failed: {message}")
            }
            Self::SourceEnded { index } => format!("Video source {index} ended"),
            Self::AudioReadFailed { message } => format!("Audio read failed: {message}"),
            Self::RenderFailed { message } => format!("Render failed: {message}"),
            Self::StreamWriteFailed { message } => format!("Live stream write failed: {message}"),
            Self::FileWriteFailed { message } => format!("File write failed: {message}"),
        }
    }
}
