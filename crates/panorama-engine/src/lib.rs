//! Task controller for live multi-camera panorama stitching.
//!
//! A [`PanoramaTask`] owns capture, synchronization, compositing,
//! post-processing and the sink threads, opened and closed per subsystem.
//! [`Engine`] drives a task from a command channel and reports back
//! through an event channel.

mod devices;
mod error;
mod events;
mod metrics;
mod orchestrator;
mod pipeline;
mod shutdown;
mod stages;
mod supervisor;
mod sync;
mod task;

pub use devices::{DeviceFactory, SystemDevices};
pub use error::{TaskError, TaskResult};
pub use metrics::MetricsCollector;
pub use orchestrator::Engine;
pub use pipeline::{StitchFormat, VideoFormat};
pub use shutdown::FinishFlag;
pub use sync::{SyncHalt, SyncNotice, SyncParams, Synchronizer};
pub use task::{PanoramaTask, SourceFramesCallback, StitchedFrameCallback};

use crossbeam_channel::{Receiver, Sender};
use panorama_ipc::{TaskCommand, TaskEvent};

/// Create an engine instance with IPC channels.
pub fn create_engine(command_rx: Receiver<TaskCommand>, event_tx: Sender<TaskEvent>) -> Engine {
    Engine::new(command_rx, event_tx)
}
