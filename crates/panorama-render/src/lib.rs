//! Render backends that composite N camera frames into one panorama.
//!
//! The geometry itself (remap tables) is produced by an offline calibration
//! step; backends only consume it. Backends are selected at configuration
//! time through [`create_render`].

mod error;
mod remap;
mod tiled;

pub use error::RenderError;
pub use remap::{RemapEntry, RemapRender, RemapTable};
pub use tiled::TiledRender;

use std::path::Path;

use panorama_ipc::{FrameSize, RenderBackend};
use panorama_media::{Frame, PixelFormat, VideoInfo};

/// Pixel format of every composited frame.
pub const RENDER_PIXEL_FORMAT: PixelFormat = PixelFormat::Bgr24;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Layout a backend was prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLayout {
    /// Size of every source frame.
    pub src_size: FrameSize,

    /// Size of the composited frame.
    pub dst_size: FrameSize,

    /// Number of sources.
    pub num_sources: usize,
}

impl RenderLayout {
    /// Description of the destination buffer.
    pub fn dst_info(&self) -> VideoInfo {
        VideoInfo::new(RENDER_PIXEL_FORMAT, self.dst_size)
    }

    /// Check a frame-set against the layout.
    pub fn check_sources(&self, sources: &[Frame]) -> RenderResult<()> {
        if sources.len() != self.num_sources {
            return Err(RenderError::SourceCount {
                expected: self.num_sources,
                actual: sources.len(),
            });
        }
        for (index, frame) in sources.iter().enumerate() {
            match frame.video_info() {
                Some(info)
                    if info.size() == self.src_size
                        && info.format.bytes_per_pixel() >= 3
                        && frame.is_valid() => {}
                _ => return Err(RenderError::SourceFormat { index }),
            }
        }
        Ok(())
    }

    /// Check the destination buffer length.
    pub fn check_destination(&self, dst: &[u8]) -> RenderResult<()> {
        let expected = self.dst_info().buffer_size();
        if dst.len() != expected {
            return Err(RenderError::DestinationSize {
                expected,
                actual: dst.len(),
            });
        }
        Ok(())
    }
}

/// Trait for panorama render backends.
pub trait PanoramaRender: Send {
    /// Load geometry and allocate lookup state.
    fn prepare(
        &mut self,
        config_path: Option<&Path>,
        src_size: FrameSize,
        dst_size: FrameSize,
        num_sources: usize,
    ) -> RenderResult<()>;

    /// Composite `sources` (one per camera, in source order) into `dst`.
    ///
    /// `dst` is a pre-allocated BGR24 buffer of the prepared destination size.
    fn render(&mut self, sources: &[Frame], dst: &mut [u8]) -> RenderResult<()>;

    /// Prepared layout, if any.
    fn layout(&self) -> Option<RenderLayout>;

    /// Get backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Create the render backend selected by configuration.
pub fn create_render(backend: RenderBackend) -> Box<dyn PanoramaRender> {
    tracing::info!(?backend, "Using render backend");
    match backend {
        RenderBackend::Remap => Box::new(RemapRender::new()),
        RenderBackend::Tiled => Box::new(TiledRender::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_create_render() {
        assert_eq!(create_render(RenderBackend::Remap).name(), "remap");
        assert_eq!(create_render(RenderBackend::Tiled).name(), "tiled");
    }

    #[test]
    fn test_layout_checks() {
        let layout = RenderLayout {
            src_size: FrameSize::new(2, 2),
            dst_size: FrameSize::new(4, 2),
            num_sources: 2,
        };
        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(2, 2));
        let frame = Frame::video(info, 0, Bytes::from(vec![0u8; 12]));

        assert!(layout.check_sources(&[frame.clone(), frame.clone()]).is_ok());
        assert!(matches!(
            layout.check_sources(&[frame.clone()]),
            Err(RenderError::SourceCount { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            layout.check_sources(&[frame, Frame::end_of_stream()]),
            Err(RenderError::SourceFormat { index: 1 })
        ));
        assert!(layout.check_destination(&[0u8; 24]).is_ok());
        assert!(layout.check_destination(&[0u8; 23]).is_err());
    }
}
