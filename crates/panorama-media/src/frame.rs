//! Media frame types.

use bytes::Bytes;

use panorama_ipc::FrameSize;

/// Kind of media carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Packed pixel layouts supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel, B G R.
    Bgr24,

    /// 4 bytes per pixel, B G R X.
    Bgr32,
}

impl PixelFormat {
    /// Bytes used by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgr24 => 3,
            Self::Bgr32 => 4,
        }
    }
}

/// Interleaved audio sample layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    /// Bytes used by one sample of one channel.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Description of a video payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// Create a video description.
    pub fn new(format: PixelFormat, size: FrameSize) -> Self {
        Self {
            format,
            width: size.width,
            height: size.height,
        }
    }

    /// Bytes per row (rows are tightly packed).
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Expected payload size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// Frame dimensions.
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Description of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioInfo {
    /// Bytes per interleaved sample frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaInfo {
    Video(VideoInfo),
    Audio(AudioInfo),

    /// End-of-stream sentinel, no payload.
    Empty,
}

/// Anything ordered by a microsecond timestamp.
pub trait Timestamped {
    /// Presentation timestamp in microseconds; negative marks end-of-stream.
    fn timestamp_us(&self) -> i64;
}

/// A timestamped media frame.
///
/// Frames are immutable once constructed. The payload is a shared
/// [`Bytes`] handle, so cloning a frame is cheap and every clone views the
/// same buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    info: MediaInfo,
    timestamp_us: i64,
    data: Bytes,
}

impl Frame {
    /// Create a video frame.
    pub fn video(info: VideoInfo, timestamp_us: i64, data: Bytes) -> Self {
        Self {
            info: MediaInfo::Video(info),
            timestamp_us,
            data,
        }
    }

    /// Create an audio frame.
    pub fn audio(info: AudioInfo, timestamp_us: i64, data: Bytes) -> Self {
        Self {
            info: MediaInfo::Audio(info),
            timestamp_us,
            data,
        }
    }

    /// Create the end-of-stream sentinel.
    pub fn end_of_stream() -> Self {
        Self {
            info: MediaInfo::Empty,
            timestamp_us: -1,
            data: Bytes::new(),
        }
    }

    /// Media description.
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Media kind, `None` for the sentinel.
    pub fn kind(&self) -> Option<MediaKind> {
        match self.info {
            MediaInfo::Video(_) => Some(MediaKind::Video),
            MediaInfo::Audio(_) => Some(MediaKind::Audio),
            MediaInfo::Empty => None,
        }
    }

    /// Returns true for video frames.
    pub fn is_video(&self) -> bool {
        matches!(self.info, MediaInfo::Video(_))
    }

    /// Returns true for audio frames.
    pub fn is_audio(&self) -> bool {
        matches!(self.info, MediaInfo::Audio(_))
    }

    /// Returns true for the end-of-stream / error sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        self.timestamp_us < 0
    }

    /// Video description, if this is a video frame.
    pub fn video_info(&self) -> Option<&VideoInfo> {
        match &self.info {
            MediaInfo::Video(info) => Some(info),
            _ => None,
        }
    }

    /// Audio description, if this is an audio frame.
    pub fn audio_info(&self) -> Option<&AudioInfo> {
        match &self.info {
            MediaInfo::Audio(info) => Some(info),
            _ => None,
        }
    }

    /// Shared payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of interleaved sample frames in an audio payload.
    pub fn sample_count(&self) -> usize {
        match &self.info {
            MediaInfo::Audio(info) if info.bytes_per_frame() > 0 => {
                self.data.len() / info.bytes_per_frame()
            }
            _ => 0,
        }
    }

    /// Validate that the payload matches the description.
    pub fn is_valid(&self) -> bool {
        match &self.info {
            MediaInfo::Video(info) => self.data.len() == info.buffer_size(),
            MediaInfo::Audio(info) => {
                info.bytes_per_frame() > 0 && self.data.len() % info.bytes_per_frame() == 0
            }
            MediaInfo::Empty => self.data.is_empty(),
        }
    }
}

impl Timestamped for Frame {
    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }
}

/// One synchronized frame per source, indexed by source.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Vec<Frame>,
}

impl FrameSet {
    /// Create a frame-set.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the set holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames in source order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frame of one source.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Consume the set.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Difference between the newest and oldest timestamp.
    pub fn spread_us(&self) -> i64 {
        let max = self.frames.iter().map(|f| f.timestamp_us).max();
        let min = self.frames.iter().map(|f| f.timestamp_us).min();
        match (max, min) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }
}

impl Timestamped for FrameSet {
    /// The newest timestamp in the set (the reference source's).
    fn timestamp_us(&self) -> i64 {
        self.frames
            .iter()
            .map(|f| f.timestamp_us)
            .max()
            .unwrap_or(-1)
    }
}
