//! Rolling segment files for recording.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use panorama_media::{Frame, Timestamped};

use crate::{FrameWriter, OutputResult, WriterConfig, RAW_CONTAINER};

/// Naming and duration rule for recording segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    dir: PathBuf,
    prefix: String,
    duration_us: i64,
}

impl SegmentPlan {
    /// Segments named `{dir}/{prefix}{n}.pvf`, each spanning `duration_secs`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            duration_us: (duration_secs as i64).saturating_mul(1_000_000),
        }
    }

    /// Path of segment `index`.
    pub fn path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.prefix, index, RAW_CONTAINER))
    }

    /// Whether a frame at `ts` belongs in the next segment.
    pub fn should_roll(&self, first_ts: i64, ts: i64) -> bool {
        ts - first_ts > self.duration_us
    }
}

/// Segment boundary crossed by a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRoll {
    pub finished: PathBuf,
    pub begun: PathBuf,
}

/// Writes a continuous stream into consecutive segment files.
pub struct SegmentedWriter {
    writer: Box<dyn FrameWriter>,
    plan: SegmentPlan,
    config: WriterConfig,
    index: u32,
    first_ts: Option<i64>,
    current: Option<PathBuf>,
}

impl SegmentedWriter {
    /// Wrap `writer`; `config.target` is replaced for every segment.
    pub fn new(writer: Box<dyn FrameWriter>, plan: SegmentPlan, config: WriterConfig) -> Self {
        Self {
            writer,
            plan,
            config,
            index: 0,
            first_ts: None,
            current: None,
        }
    }

    /// Open the first segment and return its path.
    pub fn begin(&mut self) -> OutputResult<&Path> {
        self.open_next()
    }

    /// Write a frame, rolling to the next segment when its timestamp is
    /// more than the segment duration past the current segment's first frame.
    pub fn write(&mut self, frame: &Frame) -> OutputResult<Option<SegmentRoll>> {
        if self.current.is_none() {
            self.open_next()?;
        }

        let ts = frame.timestamp_us();
        let first = *self.first_ts.get_or_insert(ts);
        let mut roll = None;
        if self.plan.should_roll(first, ts) {
            let finished = self.finish()?;
            let begun = self.open_next()?.to_path_buf();
            self.first_ts = Some(ts);
            roll = finished.map(|finished| SegmentRoll { finished, begun });
        }

        self.writer.write(frame)?;
        Ok(roll)
    }

    /// Close the current segment, returning its path.
    pub fn finish(&mut self) -> OutputResult<Option<PathBuf>> {
        let Some(path) = self.current.take() else {
            return Ok(None);
        };
        self.first_ts = None;
        self.writer.close()?;
        info!(path = %path.display(), "Finish write local file");
        Ok(Some(path))
    }

    /// Path of the open segment.
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Number of segments opened so far.
    pub fn segments(&self) -> u32 {
        self.index
    }

    #[instrument(skip(self), fields(index = self.index))]
    fn open_next(&mut self) -> OutputResult<&Path> {
        let path = self.plan.path(self.index);
        self.config.target = path.display().to_string();
        self.writer.open(&self.config)?;
        self.index += 1;
        info!(path = %path.display(), "Begin write local file");
        Ok(self.current.insert(path).as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RawFileWriter, VideoTrack};
    use bytes::Bytes;
    use panorama_ipc::{EncodePreset, FrameSize};
    use panorama_media::{read_frame, read_header, PixelFormat, VideoInfo};
    use std::fs::File;
    use std::io::BufReader;

    fn frame(ts: i64) -> Frame {
        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(1, 1));
        Frame::video(info, ts, Bytes::from(vec![0u8; 3]))
    }

    fn count_frames(path: &Path) -> usize {
        let mut reader = BufReader::new(File::open(path).unwrap());
        read_header(&mut reader).unwrap();
        std::iter::from_fn(|| read_frame(&mut reader).unwrap()).count()
    }

    #[test]
    fn test_segment_plan() {
        let plan = SegmentPlan::new("/rec", "temp", 10);
        assert_eq!(plan.path(3), PathBuf::from("/rec/temp3.pvf"));
        assert!(!plan.should_roll(0, 10_000_000));
        assert!(plan.should_roll(0, 10_000_001));
    }

    #[test]
    fn test_rolls_after_duration() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig {
            target: String::new(),
            container: RAW_CONTAINER.to_string(),
            video: Some(VideoTrack {
                frame_size: FrameSize::new(1, 1),
                frame_rate: 10,
                bitrate: 1,
                preset: EncodePreset::Veryfast,
            }),
            audio: None,
        };
        let plan = SegmentPlan::new(dir.path(), "seg", 1);
        let mut writer = SegmentedWriter::new(Box::new(RawFileWriter::new()), plan.clone(), config);

        assert_eq!(writer.begin().unwrap(), plan.path(0));

        // 10 fps for 2.5 seconds: rolls at 1.1 s and 2.2 s.
        let mut rolls = Vec::new();
        for i in 0..25 {
            if let Some(roll) = writer.write(&frame(i * 100_000)).unwrap() {
                rolls.push((i, roll));
            }
        }
        writer.finish().unwrap();

        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[0].0, 11);
        assert_eq!(rolls[0].1.finished, plan.path(0));
        assert_eq!(rolls[0].1.begun, plan.path(1));
        assert_eq!(rolls[1].0, 22);
        assert_eq!(writer.segments(), 3);
        assert!(writer.current().is_none());

        assert_eq!(count_frames(&plan.path(0)), 11);
        assert_eq!(count_frames(&plan.path(1)), 11);
        assert_eq!(count_frames(&plan.path(2)), 3);
    }
}
