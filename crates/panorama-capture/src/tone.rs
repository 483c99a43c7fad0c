//! Synthetic audio source producing a sine tone.

use std::f64::consts::TAU;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::{debug, instrument};

use panorama_media::{AudioInfo, Frame, SampleFormat};

use crate::error::CaptureError;
use crate::pacer::Pacer;
use crate::source::SourceUrl;
use crate::{clock_us, CaptureResult, FrameReader, ReaderOptions};

/// Sample frames per audio frame.
pub const SAMPLES_PER_FRAME: usize = 1024;

const AMPLITUDE: f64 = 0.2 * i16::MAX as f64;

struct ToneState {
    info: AudioInfo,
    freq: f64,
    fail_at: Option<u64>,
    pacer: Pacer,
    base_us: i64,
    samples: u64,
    frames: u64,
}

/// Audio reader producing interleaved S16 sine samples.
///
/// Query parameters: `freq` (Hz, default 440), `offset_ms`, `fail_at`
/// (frame index at which `read` fails) and `paced` (default true).
pub struct ToneReader {
    state: Option<ToneState>,
}

impl ToneReader {
    /// Create a closed reader.
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Default for ToneReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader for ToneReader {
    #[instrument(skip(self, options), fields(rate = options.sample_rate, channels = options.channels))]
    fn open(&mut self, source: &str, options: &ReaderOptions) -> CaptureResult<()> {
        if self.state.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        if options.sample_rate == 0 || options.channels == 0 {
            return Err(CaptureError::InvalidSource {
                source_name: source.to_string(),
                message: "sample rate and channel count must be non-zero".to_string(),
            });
        }

        let url = SourceUrl::parse(source)?;
        let paced = url.param_or("paced", true)?;
        let offset_us = url.param_or::<i64>("offset_ms", 0)? * 1000;
        let start_us = if paced { clock_us() } else { 0 };

        self.state = Some(ToneState {
            info: AudioInfo {
                format: SampleFormat::S16,
                channels: options.channels,
                sample_rate: options.sample_rate,
            },
            freq: url.param_or("freq", 440.0)?,
            fail_at: url.param("fail_at")?,
            pacer: Pacer::new(paced),
            base_us: start_us.max(-offset_us) + offset_us,
            samples: 0,
            frames: 0,
        });
        debug!("Tone source opened");
        Ok(())
    }

    fn read(&mut self) -> CaptureResult<Frame> {
        let state = self.state.as_mut().ok_or(CaptureError::NotOpen)?;
        if state.fail_at == Some(state.frames) {
            return Err(CaptureError::DeviceLost(format!(
                "tone source failed at frame {}",
                state.frames
            )));
        }

        let rate = state.info.sample_rate as f64;
        state
            .pacer
            .wait_until(Duration::from_secs_f64(state.samples as f64 / rate));

        let channels = state.info.channels as usize;
        let mut data = BytesMut::with_capacity(SAMPLES_PER_FRAME * state.info.bytes_per_frame());
        for i in 0..SAMPLES_PER_FRAME as u64 {
            let t = (state.samples + i) as f64 / rate;
            let sample = (AMPLITUDE * (TAU * state.freq * t).sin()) as i16;
            for _ in 0..channels {
                data.put_i16_le(sample);
            }
        }

        let timestamp_us = state.base_us + (state.samples as f64 * 1e6 / rate).round() as i64;
        state.samples += SAMPLES_PER_FRAME as u64;
        state.frames += 1;
        Ok(Frame::audio(state.info, timestamp_us, data.freeze()))
    }

    fn close(&mut self) {
        if let Some(state) = self.state.take() {
            debug!(frames = state.frames, "Tone source closed");
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panorama_media::Timestamped;

    #[test]
    fn test_tone_frames() {
        let mut reader = ToneReader::new();
        let options = ReaderOptions {
            sample_rate: 48_000,
            channels: 2,
            ..Default::default()
        };
        reader.open("test://tone?paced=false&freq=1000", &options).unwrap();

        let first = reader.read().unwrap();
        let second = reader.read().unwrap();
        assert!(first.is_audio());
        assert!(first.is_valid());
        assert_eq!(first.sample_count(), SAMPLES_PER_FRAME);
        assert_eq!(first.timestamp_us(), 0);
        assert_eq!(second.timestamp_us(), 21_333);

        // First sample of a sine is silence on both channels.
        assert_eq!(&first.data()[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_tone_negative_offset() {
        let mut reader = ToneReader::new();
        reader
            .open("test://tone?paced=false&offset_ms=-20", &ReaderOptions::default())
            .unwrap();
        assert_eq!(reader.read().unwrap().timestamp_us(), 0);
    }

    #[test]
    fn test_tone_scripted_failure() {
        let mut reader = ToneReader::new();
        reader
            .open("test://tone?paced=false&fail_at=0", &ReaderOptions::default())
            .unwrap();
        assert!(matches!(reader.read(), Err(CaptureError::DeviceLost(_))));
    }
}
