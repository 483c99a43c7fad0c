//! Error types for the task controller.

use thiserror::Error;

use panorama_ipc::Subsystem;

/// Errors returned by [`PanoramaTask`](crate::PanoramaTask) open operations.
///
/// None of these set the global finish flag; they only reject one request.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The subsystem is already running.
    #[error("{} is already open", .0.name())]
    AlreadyOpen(Subsystem),

    /// A subsystem this one feeds from is not open.
    #[error("{} requires {} to be open", .subsystem.name(), .requires.name())]
    NotReady {
        subsystem: Subsystem,
        requires: Subsystem,
    },

    /// The task has finished and must be reset before reopening.
    #[error("Task has finished; reset before reopening")]
    Finished,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A device, renderer or writer failed to open.
    #[error("{} open failed: {message}", .subsystem.name())]
    DeviceOpen {
        subsystem: Subsystem,
        message: String,
    },

    /// A stage thread could not be spawned.
    #[error("Failed to spawn stage thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl TaskError {
    pub(crate) fn device_open(subsystem: Subsystem, err: impl std::fmt::Display) -> Self {
        Self::DeviceOpen {
            subsystem,
            message: err.to_string(),
        }
    }
}

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_subsystems() {
        let err = TaskError::NotReady {
            subsystem: Subsystem::LiveStream,
            requires: Subsystem::Stitch,
        };
        assert_eq!(err.to_string(), "Live stream requires Video stitch to be open");

        let err = TaskError::device_open(Subsystem::AudioDevice, "no such device");
        assert_eq!(err.to_string(), "Audio source open failed: no such device");
    }
}
