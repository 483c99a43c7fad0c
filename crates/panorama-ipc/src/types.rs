//! Common configuration and metrics types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Width and height of a video frame in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Create a new frame size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// x264-style encoder speed preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodePreset {
    Ultrafast,
    Superfast,
    #[default]
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncodePreset {
    /// Parse a preset name, falling back to `veryfast` for anything unknown.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ultrafast" => Self::Ultrafast,
            "superfast" => Self::Superfast,
            "veryfast" => Self::Veryfast,
            "faster" => Self::Faster,
            "fast" => Self::Fast,
            "medium" => Self::Medium,
            "slow" => Self::Slow,
            "slower" => Self::Slower,
            "veryslow" => Self::Veryslow,
            _ => Self::default(),
        }
    }

    /// Returns the preset name as passed to the encoder.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

/// Synchronization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frame-sets discarded from every source before the first alignment.
    pub warmup_frames: u32,

    /// Seconds of output ticks between drift checks.
    pub check_interval_secs: u32,

    /// Allowed spread as a multiple of one frame interval.
    pub drift_tolerance: f64,

    /// Stale frames a lagging source may discard per alignment
    /// (None = two seconds worth of frames).
    pub max_catchup_frames: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            warmup_frames: 25,
            check_interval_secs: 60,
            drift_tolerance: 1.1,
            max_catchup_frames: None,
        }
    }
}

/// Configuration for opening the camera sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSourceConfig {
    /// Device identifiers, one per camera (e.g. `test://pattern`, `file:///a.pvf`).
    pub devices: Vec<String>,

    /// Capture frame size.
    pub frame_size: FrameSize,

    /// Target capture frame rate.
    pub frame_rate: u32,

    /// Synchronization tuning.
    pub sync: SyncConfig,

    /// Frames discarded at the start of each source before it is queued.
    /// Empty, or one entry per device.
    pub skip_frames: Vec<u32>,
}

impl VideoSourceConfig {
    /// Start-up skip of source `index`.
    pub fn skip_for(&self, index: usize) -> u32 {
        self.skip_frames.get(index).copied().unwrap_or(0)
    }
}

impl Default for VideoSourceConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            frame_size: FrameSize::new(1280, 720),
            frame_rate: 30,
            sync: SyncConfig::default(),
            skip_frames: Vec::new(),
        }
    }
}

/// Configuration for opening the audio source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSourceConfig {
    /// Device identifier.
    pub device: String,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// Render backend selected at configuration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// Per-source remap tables blended by weight.
    Remap,

    /// Sources laid side by side, no calibration required.
    #[default]
    Tiled,
}

/// Configuration for the compositing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Render backend.
    pub backend: RenderBackend,

    /// Geometry configuration consumed by the render backend.
    pub config_path: Option<PathBuf>,

    /// Composited frame size.
    pub frame_size: FrameSize,

    /// Whether to stamp the branding overlay.
    pub logo: bool,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackend::default(),
            config_path: None,
            frame_size: FrameSize::new(2048, 1024),
            logo: true,
        }
    }
}

/// Configuration for the live-stream output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveStreamConfig {
    /// Target URL (`rtmp://…`, `rtsp://…`, `tcp://host:port`).
    pub url: String,

    /// Output frame size; frames are resized when it differs from the stitch size.
    pub frame_size: FrameSize,

    /// Video bitrate in bits per second.
    pub video_bitrate: u32,

    /// Encoder preset name.
    pub preset: String,

    /// Audio bitrate in bits per second.
    pub audio_bitrate: u32,
}

impl LiveStreamConfig {
    /// Container implied by the URL scheme.
    pub fn container(&self) -> &'static str {
        if self.url.starts_with("rtmp") {
            "flv"
        } else {
            "rtsp"
        }
    }
}

impl Default for LiveStreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            frame_size: FrameSize::new(2048, 1024),
            video_bitrate: 4_000_000,
            preset: EncodePreset::default().as_str().to_string(),
            audio_bitrate: 128_000,
        }
    }
}

/// Configuration for segmented recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Output directory.
    pub dir: PathBuf,

    /// Segment file name prefix; files are `{prefix}{n}.pvf`.
    pub file_prefix: String,

    /// Output frame size.
    pub frame_size: FrameSize,

    /// Video bitrate in bits per second.
    pub video_bitrate: u32,

    /// Encoder preset name.
    pub preset: String,

    /// Audio bitrate in bits per second.
    pub audio_bitrate: u32,

    /// Segment length in seconds.
    pub file_duration_secs: u64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_prefix: "temp".to_string(),
            frame_size: FrameSize::new(2048, 1024),
            video_bitrate: 8_000_000,
            preset: EncodePreset::default().as_str().to_string(),
            audio_bitrate: 128_000,
            file_duration_secs: 60,
        }
    }
}

/// Full task description, as loaded by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Camera sources.
    pub video: VideoSourceConfig,

    /// Optional audio source.
    pub audio: Option<AudioSourceConfig>,

    /// Optional compositing stage.
    pub stitch: Option<StitchConfig>,

    /// Optional live stream.
    pub stream: Option<LiveStreamConfig>,

    /// Optional recording.
    pub record: Option<RecordConfig>,
}

/// Pipeline counters reported periodically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Composited frames per second since the last report.
    pub stitch_fps: f32,

    /// Frames read from all cameras.
    pub frames_captured: u64,

    /// Frame-sets published by synchronization.
    pub frame_sets_synced: u64,

    /// Frames composited.
    pub frames_stitched: u64,

    /// Frames written to the live stream.
    pub frames_sent: u64,

    /// Frames written to segment files.
    pub frames_saved: u64,

    /// Audio frames captured.
    pub audio_frames: u64,

    /// Entries evicted from drop-oldest queues.
    pub queue_drops: u64,

    /// Realignments performed by synchronization.
    pub resyncs: u64,

    /// Seconds since the first subsystem opened.
    pub uptime_seconds: u64,
}
