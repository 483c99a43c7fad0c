//! Writers for composited frames.
//!
//! Outputs share one contract, [`FrameWriter`]. Frames are serialized in
//! the raw panorama frame container; the live stream carries the same
//! records over TCP.

mod connection;
mod error;
mod file;
mod segment;
mod tcp;

pub use connection::{ConnectionState, ReconnectPolicy};
pub use error::OutputError;
pub use file::RawFileWriter;
pub use segment::{SegmentPlan, SegmentRoll, SegmentedWriter};
pub use tcp::{StreamStatistics, TcpStreamWriter};

use url::Url;

use panorama_ipc::{EncodePreset, FrameSize, LiveStreamConfig, RecordConfig};
use panorama_media::Frame;

/// Channel capacity for outgoing frame records.
pub const FRAME_CHANNEL_CAPACITY: usize = 30;

/// Result type for output operations.
pub type OutputResult<T> = Result<T, OutputError>;

/// Maximum reconnection attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Base reconnect delay in milliseconds.
pub const BASE_RECONNECT_DELAY_MS: u64 = 1000;

/// Container name of the built-in file format.
pub const RAW_CONTAINER: &str = "pvf";

/// Video track parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    pub frame_size: FrameSize,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub preset: EncodePreset,
}

/// Audio track parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub bitrate: u32,
}

/// Everything a writer needs to open its target.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// URL or file path.
    pub target: String,

    /// Container format.
    pub container: String,

    /// Video track, if any.
    pub video: Option<VideoTrack>,

    /// Audio track, if any.
    pub audio: Option<AudioTrack>,
}

impl WriterConfig {
    /// Configuration for the live stream.
    pub fn stream(config: &LiveStreamConfig, frame_rate: u32, has_audio: bool) -> Self {
        let container = if config.url.starts_with("tcp") {
            RAW_CONTAINER
        } else {
            config.container()
        };
        Self {
            target: config.url.clone(),
            container: container.to_string(),
            video: Some(VideoTrack {
                frame_size: config.frame_size,
                frame_rate,
                bitrate: config.video_bitrate,
                preset: EncodePreset::parse_or_default(&config.preset),
            }),
            audio: has_audio.then(|| AudioTrack {
                bitrate: config.audio_bitrate,
            }),
        }
    }

    /// Configuration for one recording segment; the target is filled in per segment.
    pub fn record(config: &RecordConfig, frame_rate: u32, has_audio: bool) -> Self {
        Self {
            target: String::new(),
            container: RAW_CONTAINER.to_string(),
            video: Some(VideoTrack {
                frame_size: config.frame_size,
                frame_rate,
                bitrate: config.video_bitrate,
                preset: EncodePreset::parse_or_default(&config.preset),
            }),
            audio: has_audio.then(|| AudioTrack {
                bitrate: config.audio_bitrate,
            }),
        }
    }

    /// Check a frame against the configured tracks.
    ///
    /// Returns `Ok(false)` for frames of a track this output does not carry.
    pub fn accepts(&self, frame: &Frame) -> OutputResult<bool> {
        if let Some(info) = frame.video_info() {
            let Some(video) = &self.video else {
                return Ok(false);
            };
            if info.size() != video.frame_size {
                return Err(OutputError::FrameSize {
                    expected: video.frame_size,
                    actual: info.size(),
                });
            }
            return Ok(true);
        }
        Ok(frame.is_audio() && self.audio.is_some())
    }
}

/// Trait for frame outputs.
pub trait FrameWriter: Send {
    /// Open the target described by `config`.
    fn open(&mut self, config: &WriterConfig) -> OutputResult<()>;

    /// Write one frame. Any error is final for this output.
    fn write(&mut self, frame: &Frame) -> OutputResult<()>;

    /// Flush and release the target. Safe to call when not open.
    fn close(&mut self) -> OutputResult<()>;

    /// Check if the writer is open.
    fn is_open(&self) -> bool;

    /// Get writer name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Create the writer for a live-stream URL.
///
/// `tcp://host:port` streams raw frame records; `file://` writes them to
/// disk. Other schemes name containers without a built-in muxer.
pub fn create_stream_writer(url: &str) -> OutputResult<Box<dyn FrameWriter>> {
    let parsed = Url::parse(url).map_err(|e| OutputError::InvalidTarget(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "tcp" => Ok(Box::new(TcpStreamWriter::new())),
        "file" => Ok(Box::new(RawFileWriter::new())),
        _ => {
            let config = LiveStreamConfig {
                url: url.to_string(),
                ..Default::default()
            };
            Err(OutputError::UnsupportedTarget {
                target: url.to_string(),
                container: config.container().to_string(),
            })
        }
    }
}

/// Create the writer used for recording segments.
pub fn create_file_writer() -> Box<dyn FrameWriter> {
    Box::new(RawFileWriter::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use panorama_media::{AudioInfo, PixelFormat, SampleFormat, VideoInfo};

    #[test]
    fn test_stream_writer_by_scheme() {
        assert_eq!(create_stream_writer("tcp://127.0.0.1:9000").unwrap().name(), "tcp");
        assert_eq!(create_stream_writer("file:///tmp/live.pvf").unwrap().name(), "file");
        match create_stream_writer("rtmp://live.example.com/app/key") {
            Err(OutputError::UnsupportedTarget { container, .. }) => assert_eq!(container, "flv"),
            other => panic!("unexpected {:?}", other.map(|w| w.name())),
        }
        assert!(matches!(
            create_stream_writer("::"),
            Err(OutputError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_writer_config_tracks() {
        let stream = LiveStreamConfig {
            url: "tcp://127.0.0.1:9000".into(),
            frame_size: FrameSize::new(4, 2),
            preset: "placebo".into(),
            ..Default::default()
        };
        let config = WriterConfig::stream(&stream, 30, false);
        assert_eq!(config.container, RAW_CONTAINER);
        assert_eq!(config.video.as_ref().unwrap().preset, EncodePreset::Veryfast);
        assert!(config.audio.is_none());

        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(4, 2));
        let video = Frame::video(info, 0, Bytes::from(vec![0u8; 24]));
        assert!(config.accepts(&video).unwrap());

        let audio_info = AudioInfo {
            format: SampleFormat::S16,
            channels: 1,
            sample_rate: 8000,
        };
        let audio = Frame::audio(audio_info, 0, Bytes::from(vec![0u8; 2]));
        assert!(!config.accepts(&audio).unwrap());

        let big = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(8, 2));
        let wrong = Frame::video(big, 0, Bytes::from(vec![0u8; 48]));
        assert!(matches!(
            config.accepts(&wrong),
            Err(OutputError::FrameSize { .. })
        ));
    }
}
