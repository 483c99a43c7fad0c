//! Construction of external devices.

use panorama_capture::{create_reader, CaptureResult, FrameReader};
use panorama_ipc::RenderBackend;
use panorama_output::{create_file_writer, create_stream_writer, FrameWriter, OutputResult};
use panorama_render::{create_render, PanoramaRender};

/// Creates the readers, render backend and writers a task opens.
///
/// Every method has a default built on the library factories, so an
/// embedding only overrides what it replaces.
pub trait DeviceFactory: Send + Sync {
    /// Reader for one camera.
    fn video_reader(&self, source: &str) -> CaptureResult<Box<dyn FrameReader>> {
        create_reader(source)
    }

    /// Reader for the audio device.
    fn audio_reader(&self, source: &str) -> CaptureResult<Box<dyn FrameReader>> {
        create_reader(source)
    }

    /// Render backend.
    fn render(&self, backend: RenderBackend) -> Box<dyn PanoramaRender> {
        create_render(backend)
    }

    /// Live-stream writer for `url`.
    fn stream_writer(&self, url: &str) -> OutputResult<Box<dyn FrameWriter>> {
        create_stream_writer(url)
    }

    /// Writer used for each recording segment.
    fn file_writer(&self) -> Box<dyn FrameWriter> {
        create_file_writer()
    }
}

/// The built-in readers, backends and writers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl DeviceFactory for SystemDevices {}
