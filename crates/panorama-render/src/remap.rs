//! Remap-table backend.
//!
//! The configuration file is JSON listing one table per source:
//!
//! ```json
//! { "sources": [ { "table": "cam0.map" }, { "table": "cam1.map" } ] }
//! ```
//!
//! Relative table paths are resolved against the configuration file's
//! directory. A table covers the whole destination frame; for every
//! destination pixel it names the source pixel to sample and a blend weight.
//! Binary layout, little-endian: `PMAP`, `u32` width, `u32` height, then
//! `width * height` records of `f32 x, f32 y, f32 weight`.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use tracing::{debug, instrument};

use panorama_ipc::FrameSize;
use panorama_media::Frame;

use crate::error::RenderError;
use crate::{PanoramaRender, RenderLayout, RenderResult};

const TABLE_MAGIC: &[u8; 4] = b"PMAP";
const ENTRY_LEN: usize = 12;

/// One destination pixel's sampling instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemapEntry {
    pub x: f32,
    pub y: f32,
    pub weight: f32,
}

/// Per-source lookup table covering the destination frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    pub width: u32,
    pub height: u32,
    pub entries: Vec<RemapEntry>,
}

impl RemapTable {
    /// Decode a table file.
    pub fn load(path: &Path) -> RenderResult<Self> {
        let raw = fs::read(path)?;
        let invalid = |message: &str| RenderError::InvalidTable {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if raw.len() < 12 || &raw[..4] != TABLE_MAGIC {
            return Err(invalid("missing PMAP header"));
        }
        let mut buf = &raw[4..];
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let count = width as usize * height as usize;
        if buf.remaining() != count * ENTRY_LEN {
            return Err(invalid("entry count does not match dimensions"));
        }

        let entries = (0..count)
            .map(|_| RemapEntry {
                x: buf.get_f32_le(),
                y: buf.get_f32_le(),
                weight: buf.get_f32_le(),
            })
            .collect();

        Ok(Self {
            width,
            height,
            entries,
        })
    }

    /// Encode the table to a file.
    pub fn save(&self, path: &Path) -> RenderResult<()> {
        let mut buf = BytesMut::with_capacity(12 + self.entries.len() * ENTRY_LEN);
        buf.put_slice(TABLE_MAGIC);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        for entry in &self.entries {
            buf.put_f32_le(entry.x);
            buf.put_f32_le(entry.y);
            buf.put_f32_le(entry.weight);
        }
        fs::write(path, &buf)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RemapConfig {
    sources: Vec<RemapSource>,
}

#[derive(Debug, Deserialize)]
struct RemapSource {
    table: PathBuf,
}

/// A source pixel and its normalized weight; weight 0 means "not covered".
#[derive(Debug, Clone, Copy)]
struct Tap {
    offset: u32,
    weight: f32,
}

struct Prepared {
    layout: RenderLayout,
    /// `taps[source][dst_pixel]`
    taps: Vec<Vec<Tap>>,
}

/// Samples each source through its remap table and blends by weight.
pub struct RemapRender {
    prepared: Option<Prepared>,
}

impl RemapRender {
    /// Create an unprepared backend.
    pub fn new() -> Self {
        Self { prepared: None }
    }
}

impl Default for RemapRender {
    fn default() -> Self {
        Self::new()
    }
}

impl PanoramaRender for RemapRender {
    #[instrument(skip(self))]
    fn prepare(
        &mut self,
        config_path: Option<&Path>,
        src_size: FrameSize,
        dst_size: FrameSize,
        num_sources: usize,
    ) -> RenderResult<()> {
        self.prepared = None;
        let config_path = config_path
            .ok_or_else(|| RenderError::Config("remap backend requires a config file".into()))?;
        let config: RemapConfig = serde_json::from_slice(&fs::read(config_path)?)?;
        if config.sources.len() != num_sources {
            return Err(RenderError::Config(format!(
                "config lists {} sources, {} are open",
                config.sources.len(),
                num_sources
            )));
        }

        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let pixels = dst_size.area();
        let mut taps = Vec::with_capacity(num_sources);
        for source in &config.sources {
            let path = base.join(&source.table);
            let table = RemapTable::load(&path)?;
            if table.width != dst_size.width || table.height != dst_size.height {
                return Err(RenderError::InvalidTable {
                    path,
                    message: format!(
                        "table is {}x{}, destination is {dst_size}",
                        table.width, table.height
                    ),
                });
            }
            taps.push(
                table
                    .entries
                    .iter()
                    .map(|e| to_tap(e, src_size))
                    .collect::<Vec<_>>(),
            );
        }

        // Normalize so the weights of every destination pixel sum to one.
        for px in 0..pixels {
            let total: f32 = taps.iter().map(|t| t[px].weight).sum();
            if total > 0.0 {
                for source in taps.iter_mut() {
                    source[px].weight /= total;
                }
            }
        }

        debug!(sources = num_sources, %dst_size, "Remap tables loaded");
        self.prepared = Some(Prepared {
            layout: RenderLayout {
                src_size,
                dst_size,
                num_sources,
            },
            taps,
        });
        Ok(())
    }

    fn render(&mut self, sources: &[Frame], dst: &mut [u8]) -> RenderResult<()> {
        let prepared = self.prepared.as_ref().ok_or(RenderError::NotPrepared)?;
        prepared.layout.check_sources(sources)?;
        prepared.layout.check_destination(dst)?;

        let strides: Vec<usize> = sources
            .iter()
            .map(|f| f.video_info().map_or(3, |i| i.format.bytes_per_pixel()))
            .collect();

        for (px, out) in dst.chunks_exact_mut(3).enumerate() {
            let mut acc = [0f32; 3];
            for (s, frame) in sources.iter().enumerate() {
                let tap = prepared.taps[s][px];
                if tap.weight <= 0.0 {
                    continue;
                }
                let offset = tap.offset as usize * strides[s];
                let src = &frame.data()[offset..offset + 3];
                for c in 0..3 {
                    acc[c] += tap.weight * src[c] as f32;
                }
            }
            for c in 0..3 {
                out[c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }

    fn layout(&self) -> Option<RenderLayout> {
        self.prepared.as_ref().map(|p| p.layout)
    }

    fn name(&self) -> &'static str {
        "remap"
    }
}

fn to_tap(entry: &RemapEntry, src_size: FrameSize) -> Tap {
    let x = entry.x.round();
    let y = entry.y.round();
    let inside = entry.weight > 0.0
        && x >= 0.0
        && y >= 0.0
        && x < src_size.width as f32
        && y < src_size.height as f32;
    if !inside {
        return Tap {
            offset: 0,
            weight: 0.0,
        };
    }
    Tap {
        offset: y as u32 * src_size.width + x as u32,
        weight: entry.weight,
    }
}
