//! Synthetic camera producing a scrolling colour-bar pattern.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::{debug, instrument};

use panorama_media::{Frame, VideoInfo};

use crate::error::CaptureError;
use crate::pacer::Pacer;
use crate::source::SourceUrl;
use crate::{clock_us, CaptureResult, FrameReader, ReaderOptions, CAPTURE_PIXEL_FORMAT};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [0, 255, 255],
    [255, 255, 0],
    [0, 255, 0],
    [255, 0, 255],
    [0, 0, 255],
    [255, 0, 0],
    [0, 0, 0],
];

/// Pixels the pattern scrolls per frame.
const SCROLL_STEP: usize = 4;

/// Timestamp script of a pattern source, read from the query string.
///
/// | parameter     | meaning                                                    |
/// |---------------|------------------------------------------------------------|
/// | `offset_ms`   | constant offset added to every timestamp                   |
/// | `rate_scale`  | timestamps advance this many times faster than real time   |
/// | `scale_frames`| frames `rate_scale` applies to; later frames are corrected |
/// | `jump_at`     | frame index from which `jump_ms` is added                  |
/// | `jump_ms`     | size of the scripted timestamp jump                        |
/// | `fail_at`     | frame index at which `read` fails                          |
/// | `paced`       | sleep to the nominal rate (default true)                   |
/// | `hue`         | tint that tells sources apart                              |
#[derive(Debug, Clone, PartialEq)]
struct PatternScript {
    offset_us: i64,
    rate_scale: f64,
    scale_frames: Option<u64>,
    jump_at: Option<u64>,
    jump_us: i64,
    fail_at: Option<u64>,
    paced: bool,
    hue: u8,
}

impl PatternScript {
    fn from_url(url: &SourceUrl) -> CaptureResult<Self> {
        Ok(Self {
            offset_us: url.param_or::<i64>("offset_ms", 0)? * 1000,
            rate_scale: url.param_or("rate_scale", 1.0)?,
            scale_frames: url.param("scale_frames")?,
            jump_at: url.param("jump_at")?,
            jump_us: url.param_or::<i64>("jump_ms", 0)? * 1000,
            fail_at: url.param("fail_at")?,
            paced: url.param_or("paced", true)?,
            hue: url.param_or("hue", 0)?,
        })
    }

    /// Timestamp of frame `index`, relative to the stream start.
    fn offset_of(&self, index: u64, interval_us: f64) -> i64 {
        let nominal = index as f64 * interval_us;
        let scaled = match self.scale_frames {
            Some(limit) if index >= limit => nominal,
            _ => nominal * self.rate_scale,
        };
        let jump = match self.jump_at {
            Some(at) if index >= at => self.jump_us,
            _ => 0,
        };
        self.offset_us + scaled.round() as i64 + jump
    }

    /// Most negative offset the script can produce; the stream start is
    /// moved forward by this much so no timestamp goes below zero.
    fn earliest_offset(&self) -> i64 {
        let jumped = if self.jump_at.is_some() { self.jump_us } else { 0 };
        self.offset_us.min(self.offset_us + jumped).min(0)
    }
}

struct PatternState {
    info: VideoInfo,
    image: Vec<u8>,
    script: PatternScript,
    pacer: Pacer,
    interval_us: f64,
    base_us: i64,
    index: u64,
}

/// Video reader that generates frames instead of capturing them.
pub struct TestPatternReader {
    state: Option<PatternState>,
}

impl TestPatternReader {
    /// Create a closed reader.
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Default for TestPatternReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader for TestPatternReader {
    #[instrument(skip(self, options), fields(size = %options.frame_size))]
    fn open(&mut self, source: &str, options: &ReaderOptions) -> CaptureResult<()> {
        if self.state.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        if options.frame_size.is_empty() || options.frame_rate == 0 {
            return Err(CaptureError::InvalidSource {
                source_name: source.to_string(),
                message: format!(
                    "unusable format {} @ {} fps",
                    options.frame_size, options.frame_rate
                ),
            });
        }

        let url = SourceUrl::parse(source)?;
        let script = PatternScript::from_url(&url)?;
        let info = VideoInfo::new(CAPTURE_PIXEL_FORMAT, options.frame_size);
        let start_us = if script.paced { clock_us() } else { 0 };
        let base_us = start_us.max(-script.earliest_offset());

        debug!(?script, "Pattern source opened");
        self.state = Some(PatternState {
            image: draw_bars(&info, script.hue),
            info,
            pacer: Pacer::new(script.paced),
            interval_us: 1_000_000.0 / options.frame_rate as f64,
            script,
            base_us,
            index: 0,
        });
        Ok(())
    }

    fn read(&mut self) -> CaptureResult<Frame> {
        let state = self.state.as_mut().ok_or(CaptureError::NotOpen)?;
        let index = state.index;

        if state.script.fail_at == Some(index) {
            return Err(CaptureError::DeviceLost(format!(
                "pattern source failed at frame {index}"
            )));
        }

        state
            .pacer
            .wait_until(Duration::from_secs_f64(index as f64 * state.interval_us / 1e6));

        let stride = state.info.stride();
        let bpp = state.info.format.bytes_per_pixel();
        let shift = (index as usize * SCROLL_STEP) % state.info.width as usize * bpp;

        let mut data = BytesMut::with_capacity(state.info.buffer_size());
        for row in state.image.chunks_exact(stride) {
            data.put_slice(&row[shift..]);
            data.put_slice(&row[..shift]);
        }

        let timestamp_us = state.base_us + state.script.offset_of(index, state.interval_us);
        state.index += 1;
        Ok(Frame::video(state.info, timestamp_us, data.freeze()))
    }

    fn close(&mut self) {
        if let Some(state) = self.state.take() {
            debug!(frames = state.index, "Pattern source closed");
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

fn draw_bars(info: &VideoInfo, hue: u8) -> Vec<u8> {
    let width = info.width as usize;
    let height = info.height as usize;
    let mut image = Vec::with_capacity(info.buffer_size());
    for y in 0..height {
        let shade = (y * 255 / height.max(1)) as u8;
        for x in 0..width {
            let bar = BARS[x * BARS.len() / width];
            image.extend_from_slice(&[bar[0] ^ hue, bar[1], bar[2].saturating_sub(shade / 2)]);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use panorama_ipc::FrameSize;
    use panorama_media::Timestamped;

    fn options() -> ReaderOptions {
        ReaderOptions {
            frame_rate: 25,
            frame_size: FrameSize::new(32, 8),
            ..Default::default()
        }
    }

    fn timestamps(source: &str, count: usize) -> Vec<i64> {
        let mut reader = TestPatternReader::new();
        reader.open(source, &options()).unwrap();
        (0..count)
            .map(|_| reader.read().unwrap().timestamp_us())
            .collect()
    }

    #[test]
    fn test_unpaced_frames() {
        let mut reader = TestPatternReader::new();
        assert!(matches!(reader.read(), Err(CaptureError::NotOpen)));

        reader.open("test://pattern?paced=false", &options()).unwrap();
        assert!(reader.is_open());
        let first = reader.read().unwrap();
        let second = reader.read().unwrap();

        assert!(first.is_valid());
        assert_eq!(first.video_info().unwrap().size(), FrameSize::new(32, 8));
        assert_eq!(first.timestamp_us(), 0);
        assert_eq!(second.timestamp_us(), 40_000);
        assert_ne!(first.data(), second.data());

        assert!(matches!(
            reader.open("test://pattern", &options()),
            Err(CaptureError::AlreadyOpen)
        ));
        reader.close();
        reader.close();
        assert!(!reader.is_open());
    }

    #[test]
    fn test_rate_scale_then_corrected() {
        let ts = timestamps("test://pattern?paced=false&rate_scale=2&scale_frames=2", 4);
        assert_eq!(ts, vec![0, 80_000, 80_000, 120_000]);
    }

    #[test]
    fn test_offset_and_jump() {
        let ts = timestamps("test://pattern?paced=false&offset_ms=5&jump_at=2&jump_ms=1000", 3);
        assert_eq!(ts, vec![5_000, 45_000, 1_085_000]);
    }

    #[test]
    fn test_negative_offset_stays_non_negative() {
        let ts = timestamps("test://pattern?paced=false&offset_ms=-40", 3);
        assert_eq!(ts, vec![0, 40_000, 80_000]);

        let ts = timestamps("test://pattern?paced=false&jump_at=1&jump_ms=-100", 3);
        assert!(ts.iter().all(|&t| t >= 0), "{ts:?}");
        assert_eq!(ts[0] - ts[1], 60_000);

        let ts = timestamps("test://pattern?offset_ms=-40", 2);
        assert!(ts[0] >= 0);
    }

    #[test]
    fn test_scripted_failure() {
        let mut reader = TestPatternReader::new();
        reader.open("test://pattern?paced=false&fail_at=1", &options()).unwrap();
        assert!(reader.read().is_ok());
        assert!(matches!(reader.read(), Err(CaptureError::DeviceLost(_))));
    }

    #[test]
    fn test_paced_reader_keeps_rate() {
        let mut reader = TestPatternReader::new();
        reader.open("test://pattern", &options()).unwrap();
        let started = std::time::Instant::now();
        let first = reader.read().unwrap().timestamp_us();
        for _ in 0..4 {
            reader.read().unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(first >= 0);
    }

    #[test]
    fn test_rejects_empty_format() {
        let mut reader = TestPatternReader::new();
        let options = ReaderOptions {
            frame_size: FrameSize::new(0, 0),
            ..options()
        };
        assert!(reader.open("test://pattern", &options).is_err());
    }
}
