//! Commands sent from the front-end to the engine.

use serde::{Deserialize, Serialize};

use crate::types::{
    AudioSourceConfig, LiveStreamConfig, RecordConfig, StitchConfig, VideoSourceConfig,
};

/// Commands that a front-end can send to the engine.
///
/// Each open/close pair maps onto one subsystem of the task controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskCommand {
    /// Open every configured camera and start capture + synchronization.
    OpenVideoDevices(VideoSourceConfig),

    /// Stop capture and synchronization.
    CloseVideoDevices,

    /// Open the audio device and start its capture thread.
    OpenAudioDevice(AudioSourceConfig),

    /// Stop audio capture.
    CloseAudioDevice,

    /// Prepare the renderer and start compositing.
    BeginVideoStitch(StitchConfig),

    /// Stop compositing and post-processing.
    StopVideoStitch,

    /// Open the live-stream writer and start sending.
    OpenLiveStream(LiveStreamConfig),

    /// Stop sending and close the live-stream writer.
    CloseLiveStream,

    /// Start writing rolling segment files.
    BeginSaveToDisk(RecordConfig),

    /// Stop writing segment files.
    StopSaveToDisk,

    /// Request the current subsystem states.
    GetStatus,

    /// Tear down every subsystem and exit the engine loop.
    Shutdown,
}
