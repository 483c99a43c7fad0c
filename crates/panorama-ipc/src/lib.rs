//! Typed configuration, commands and events for the panorama task.
//!
//! This crate defines the message types exchanged between a front-end
//! (CLI or embedding application) and the engine core, plus the serde
//! configuration used to open each subsystem.

mod commands;
mod events;
mod state;
mod types;

pub use commands::TaskCommand;
pub use events::TaskEvent;
pub use state::{StopReason, Subsystem, SubsystemState};
pub use types::{
    AudioSourceConfig, EncodePreset, FrameSize, LiveStreamConfig, RecordConfig, RenderBackend,
    StitchConfig, SyncConfig, TaskConfig, TaskMetrics, VideoSourceConfig,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front-end → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → front-end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<TaskCommand>, Receiver<TaskCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<TaskEvent>, Receiver<TaskEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
