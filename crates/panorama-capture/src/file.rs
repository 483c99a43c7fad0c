//! Replay of recorded frame containers.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, instrument};

use panorama_media::{read_frame, read_header, Frame, Timestamped};

use crate::error::CaptureError;
use crate::pacer::Pacer;
use crate::source::SourceUrl;
use crate::{CaptureResult, FrameReader, ReaderOptions};

struct FileState {
    path: PathBuf,
    reader: BufReader<File>,
    pacer: Pacer,
    first_ts: Option<i64>,
    frames: u64,
}

/// Reads frames back from a recorded container (`file:///path?paced=false`).
///
/// Frames keep their recorded timestamps. When paced (the default), each
/// frame is released at its offset from the first recorded frame. The end
/// of the file is reported as [`CaptureError::EndOfStream`].
pub struct FileReader {
    state: Option<FileState>,
}

impl FileReader {
    /// Create a closed reader.
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Default for FileReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader for FileReader {
    #[instrument(skip(self, _options))]
    fn open(&mut self, source: &str, _options: &ReaderOptions) -> CaptureResult<()> {
        if self.state.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }

        let url = SourceUrl::parse(source)?;
        let path = url.file_path()?;
        let paced = url.param_or("paced", true)?;

        let mut reader = BufReader::new(File::open(&path)?);
        read_header(&mut reader)?;

        info!(path = %path.display(), paced, "Replaying recording");
        self.state = Some(FileState {
            path,
            reader,
            pacer: Pacer::new(paced),
            first_ts: None,
            frames: 0,
        });
        Ok(())
    }

    fn read(&mut self) -> CaptureResult<Frame> {
        let state = self.state.as_mut().ok_or(CaptureError::NotOpen)?;
        let frame = read_frame(&mut state.reader)?.ok_or(CaptureError::EndOfStream)?;

        let ts = frame.timestamp_us();
        let first = *state.first_ts.get_or_insert(ts);
        let offset = u64::try_from(ts - first).unwrap_or(0);
        state.pacer.wait_until(Duration::from_micros(offset));

        state.frames += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if let Some(state) = self.state.take() {
            debug!(path = %state.path.display(), frames = state.frames, "Recording closed");
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}
