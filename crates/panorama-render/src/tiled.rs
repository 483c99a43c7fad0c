//! Side-by-side backend that needs no calibration.

use std::path::Path;

use tracing::debug;

use panorama_ipc::FrameSize;
use panorama_media::Frame;

use crate::error::RenderError;
use crate::{PanoramaRender, RenderLayout, RenderResult};

/// Destination columns owned by one source, with nearest-neighbour maps.
struct Column {
    x0: usize,
    /// Source x for every destination column.
    x_map: Vec<usize>,
}

struct Prepared {
    layout: RenderLayout,
    columns: Vec<Column>,
    /// Source row for every destination row.
    y_map: Vec<usize>,
}

/// Scales every source into an equal-width vertical strip.
///
/// The last strip absorbs the remainder when the destination width is not
/// a multiple of the source count.
pub struct TiledRender {
    prepared: Option<Prepared>,
}

impl TiledRender {
    /// Create an unprepared backend.
    pub fn new() -> Self {
        Self { prepared: None }
    }
}

impl Default for TiledRender {
    fn default() -> Self {
        Self::new()
    }
}

impl PanoramaRender for TiledRender {
    fn prepare(
        &mut self,
        _config_path: Option<&Path>,
        src_size: FrameSize,
        dst_size: FrameSize,
        num_sources: usize,
    ) -> RenderResult<()> {
        self.prepared = None;
        if num_sources == 0 || src_size.is_empty() || dst_size.is_empty() {
            return Err(RenderError::Config(format!(
                "cannot tile {num_sources} sources of {src_size} into {dst_size}"
            )));
        }
        if (dst_size.width as usize) < num_sources {
            return Err(RenderError::Config(format!(
                "destination width {} is narrower than {num_sources} sources",
                dst_size.width
            )));
        }

        let dst_w = dst_size.width as usize;
        let src_w = src_size.width as usize;
        let strip = dst_w / num_sources;
        let columns = (0..num_sources)
            .map(|i| {
                let x0 = i * strip;
                let width = if i + 1 == num_sources { dst_w - x0 } else { strip };
                Column {
                    x0,
                    x_map: (0..width).map(|x| x * src_w / width).collect(),
                }
            })
            .collect();

        let src_h = src_size.height as usize;
        let dst_h = dst_size.height as usize;
        let y_map = (0..dst_h).map(|y| y * src_h / dst_h).collect();

        debug!(num_sources, strip, "Tiled layout prepared");
        self.prepared = Some(Prepared {
            layout: RenderLayout {
                src_size,
                dst_size,
                num_sources,
            },
            columns,
            y_map,
        });
        Ok(())
    }

    fn render(&mut self, sources: &[Frame], dst: &mut [u8]) -> RenderResult<()> {
        let prepared = self.prepared.as_ref().ok_or(RenderError::NotPrepared)?;
        prepared.layout.check_sources(sources)?;
        prepared.layout.check_destination(dst)?;

        let dst_stride = prepared.layout.dst_size.width as usize * 3;
        for (frame, column) in sources.iter().zip(&prepared.columns) {
            let Some(info) = frame.video_info() else {
                continue;
            };
            let bpp = info.format.bytes_per_pixel();
            let src_stride = info.stride();
            let data = frame.data();

            for (y, &sy) in prepared.y_map.iter().enumerate() {
                let src_row = &data[sy * src_stride..(sy + 1) * src_stride];
                let dst_row = &mut dst[y * dst_stride..(y + 1) * dst_stride];
                for (i, &sx) in column.x_map.iter().enumerate() {
                    let d = (column.x0 + i) * 3;
                    let s = sx * bpp;
                    dst_row[d..d + 3].copy_from_slice(&src_row[s..s + 3]);
                }
            }
        }
        Ok(())
    }

    fn layout(&self) -> Option<RenderLayout> {
        self.prepared.as_ref().map(|p| p.layout)
    }

    fn name(&self) -> &'static str {
        "tiled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use panorama_media::{PixelFormat, VideoInfo};

    fn solid(format: PixelFormat, value: u8) -> Frame {
        let info = VideoInfo::new(format, FrameSize::new(4, 2));
        Frame::video(info, 0, Bytes::from(vec![value; info.buffer_size()]))
    }

    #[test]
    fn test_tiles_sources_left_to_right() {
        let mut render = TiledRender::new();
        render
            .prepare(None, FrameSize::new(4, 2), FrameSize::new(5, 1), 2)
            .unwrap();

        let mut dst = vec![0u8; 15];
        render
            .render(
                &[solid(PixelFormat::Bgr24, 10), solid(PixelFormat::Bgr32, 20)],
                &mut dst,
            )
            .unwrap();

        // Strip width 2, the last strip takes 3 columns.
        let pixels: Vec<u8> = dst.chunks(3).map(|px| px[0]).collect();
        assert_eq!(pixels, vec![10, 10, 20, 20, 20]);
    }

    #[test]
    fn test_rejects_bad_layout() {
        let mut render = TiledRender::new();
        assert!(render
            .prepare(None, FrameSize::new(4, 2), FrameSize::new(1, 1), 2)
            .is_err());
        assert!(render
            .prepare(None, FrameSize::new(4, 2), FrameSize::new(8, 2), 0)
            .is_err());
        assert!(render.layout().is_none());
    }
}
