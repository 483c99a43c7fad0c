//! Events sent from the engine to the front-end.

use serde::{Deserialize, Serialize};

use crate::state::{StopReason, Subsystem, SubsystemState};
use crate::types::TaskMetrics;

/// Events that the engine can send to the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    /// Engine is ready to accept commands.
    Ready,

    /// Human-readable status line.
    Log {
        /// The status message.
        message: String,
    },

    /// Measured capture frame rate of the first video source.
    SourceFrameRate {
        /// Frames per second.
        fps: f64,
    },

    /// Measured compositing frame rate.
    StitchFrameRate {
        /// Frames per second.
        fps: f64,
    },

    /// A subsystem changed lifecycle state.
    SubsystemChanged {
        /// Which subsystem.
        subsystem: Subsystem,

        /// New state.
        state: SubsystemState,
    },

    /// Snapshot of every subsystem's state, sent in reply to `GetStatus`.
    Status {
        /// States in teardown order.
        subsystems: Vec<(Subsystem, SubsystemState)>,

        /// Whether the global finish flag is set.
        finished: bool,
    },

    /// Synchronization lost alignment and realigned the sources.
    Resynchronized {
        /// Timestamp spread (microseconds) that triggered the resync.
        spread_us: i64,
    },

    /// Periodic pipeline metrics.
    Metrics(TaskMetrics),

    /// The global finish flag was raised.
    Finished {
        /// Why the task finished.
        reason: StopReason,
    },

    /// Engine has shut down.
    Shutdown,
}
