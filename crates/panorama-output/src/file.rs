//! Raw frame container files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use bytes::BytesMut;
use tracing::{debug, instrument};
use url::Url;

use panorama_media::{encode_frame, write_header, Frame};

use crate::error::OutputError;
use crate::{FrameWriter, OutputResult, WriterConfig};

struct OpenFile {
    path: PathBuf,
    config: WriterConfig,
    writer: BufWriter<File>,
    frames: u64,
}

/// Writes frames to a local container file.
///
/// The target is a plain path or a `file://` URL. Missing parent
/// directories are created.
pub struct RawFileWriter {
    file: Option<OpenFile>,
    buf: BytesMut,
}

impl RawFileWriter {
    /// Create a closed writer.
    pub fn new() -> Self {
        Self {
            file: None,
            buf: BytesMut::new(),
        }
    }

    /// Path of the open file.
    pub fn path(&self) -> Option<&PathBuf> {
        self.file.as_ref().map(|f| &f.path)
    }
}

impl Default for RawFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn target_path(target: &str) -> OutputResult<PathBuf> {
    if target.starts_with("file:") {
        let url = Url::parse(target).map_err(|e| OutputError::InvalidTarget(e.to_string()))?;
        return url
            .to_file_path()
            .map_err(|_| OutputError::InvalidTarget(target.to_string()));
    }
    if target.is_empty() {
        return Err(OutputError::InvalidTarget("empty path".to_string()));
    }
    Ok(PathBuf::from(target))
}

impl FrameWriter for RawFileWriter {
    #[instrument(skip(self, config), fields(target = %config.target))]
    fn open(&mut self, config: &WriterConfig) -> OutputResult<()> {
        if self.file.is_some() {
            return Err(OutputError::AlreadyOpen);
        }

        let path = target_path(&config.target)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        write_header(&mut writer)?;

        debug!(path = %path.display(), "Output file created");
        self.file = Some(OpenFile {
            path,
            config: config.clone(),
            writer,
            frames: 0,
        });
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> OutputResult<()> {
        let file = self.file.as_mut().ok_or(OutputError::NotOpen)?;
        if !file.config.accepts(frame)? {
            return Ok(());
        }

        self.buf.clear();
        encode_frame(frame, &mut self.buf)?;
        file.writer.write_all(&self.buf)?;
        file.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> OutputResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.writer.flush()?;
        debug!(path = %file.path.display(), frames = file.frames, "Output file closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
