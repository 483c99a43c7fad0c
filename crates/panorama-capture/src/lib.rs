//! Capture readers for camera and audio sources.
//!
//! A source is named by a URL. The scheme and host select the reader:
//!
//! - `test://pattern?...` synthetic video ([`TestPatternReader`])
//! - `test://tone?...` synthetic audio ([`ToneReader`])
//! - `file:///path/to/recording.pvf` recorded-file replay ([`FileReader`])

mod error;
mod file;
mod pacer;
mod pattern;
mod source;
mod tone;

pub use error::CaptureError;
pub use file::FileReader;
pub use pattern::TestPatternReader;
pub use source::SourceUrl;
pub use tone::ToneReader;

use std::sync::OnceLock;
use std::time::Instant;

use panorama_ipc::{AudioSourceConfig, FrameSize, VideoSourceConfig};
use panorama_media::{Frame, PixelFormat};

/// Pixel format delivered by every video reader.
pub const CAPTURE_PIXEL_FORMAT: PixelFormat = PixelFormat::Bgr24;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Options passed to [`FrameReader::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Target video frame rate.
    pub frame_rate: u32,

    /// Video frame size.
    pub frame_size: FrameSize,

    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    /// Audio channel count.
    pub channels: u16,
}

impl ReaderOptions {
    /// Options for a camera source.
    pub fn video(config: &VideoSourceConfig) -> Self {
        Self {
            frame_rate: config.frame_rate,
            frame_size: config.frame_size,
            ..Self::default()
        }
    }

    /// Options for the audio source.
    pub fn audio(config: &AudioSourceConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            ..Self::default()
        }
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            frame_size: FrameSize::new(1280, 720),
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// A blocking frame source.
pub trait FrameReader: Send {
    /// Open the source.
    fn open(&mut self, source: &str, options: &ReaderOptions) -> CaptureResult<()>;

    /// Block until the next frame is available.
    ///
    /// Any error is final: the reader will not produce more frames.
    fn read(&mut self) -> CaptureResult<Frame>;

    /// Release the source. Safe to call more than once.
    fn close(&mut self);

    /// Check if the reader is open.
    fn is_open(&self) -> bool;
}

/// Create a reader for `source` based on its scheme.
pub fn create_reader(source: &str) -> CaptureResult<Box<dyn FrameReader>> {
    let url = SourceUrl::parse(source)?;
    match (url.scheme(), url.kind()) {
        ("test", Some("pattern")) => Ok(Box::new(TestPatternReader::new())),
        ("test", Some("tone")) => Ok(Box::new(ToneReader::new())),
        ("file", _) => Ok(Box::new(FileReader::new())),
        _ => Err(CaptureError::UnsupportedSource(source.to_string())),
    }
}

/// Microseconds on the capture clock shared by every reader in the process.
pub fn clock_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}
