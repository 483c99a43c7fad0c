//! Branding overlay stamped onto composited frames.

use crate::frame::VideoInfo;
use panorama_ipc::FrameSize;

/// Blocks of this size each receive one centred copy of the logo.
const LOGO_BLOCK: u32 = 512;

/// A BGRA logo image.
#[derive(Debug, Clone)]
pub struct Logo {
    width: u32,
    height: u32,
    bgra: Vec<u8>,
}

impl Logo {
    /// Wrap a tightly packed BGRA buffer. Returns `None` if the length is wrong.
    pub fn from_bgra(width: u32, height: u32, bgra: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || bgra.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            bgra,
        })
    }

    /// The built-in badge: a translucent rounded bar with a solid stripe.
    pub fn badge() -> Self {
        let (width, height) = (256u32, 128u32);
        let mut bgra = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let dx = (x as i32 - width as i32 / 2).abs();
                let dy = (y as i32 - height as i32 / 2).abs();
                let inside = dx < 112 && dy < 40;
                let stripe = inside && dy < 6;
                let alpha = match (inside, stripe) {
                    (_, true) => 230,
                    (true, false) => 96,
                    _ => 0,
                };
                bgra.extend_from_slice(&[255, 255, 255, alpha]);
            }
        }
        Self {
            width,
            height,
            bgra,
        }
    }

    /// Logo dimensions.
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        &self.bgra[offset..offset + 4]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    dst_x: u32,
    dst_y: u32,
    src_x: u32,
    src_y: u32,
    width: u32,
    height: u32,
}

/// A logo laid out for one frame size.
pub struct LogoOverlay {
    logo: Logo,
    frame_size: FrameSize,
    placements: Vec<Placement>,
}

impl LogoOverlay {
    /// Compute placements for frames of `frame_size`.
    ///
    /// A frame smaller than the logo gets the centred crop of the logo over
    /// its whole area. Otherwise one copy is centred in every 512x512 block,
    /// clipped to the frame.
    pub fn new(logo: Logo, frame_size: FrameSize) -> Self {
        let mut placements = Vec::new();
        let (fw, fh) = (frame_size.width, frame_size.height);
        let (lw, lh) = (logo.width, logo.height);

        if frame_size.is_empty() {
            // nothing to stamp
        } else if fw < lw || fh < lh {
            let width = fw.min(lw);
            let height = fh.min(lh);
            placements.push(Placement {
                dst_x: (fw - width) / 2,
                dst_y: (fh - height) / 2,
                src_x: (lw - width) / 2,
                src_y: (lh - height) / 2,
                width,
                height,
            });
        } else {
            let cols = fw.div_ceil(LOGO_BLOCK);
            let rows = fh.div_ceil(LOGO_BLOCK);
            for row in 0..rows {
                for col in 0..cols {
                    let x = (col * LOGO_BLOCK + LOGO_BLOCK / 2) as i64 - (lw / 2) as i64;
                    let y = (row * LOGO_BLOCK + LOGO_BLOCK / 2) as i64 - (lh / 2) as i64;
                    if let Some(p) = clip(x, y, lw, lh, fw, fh) {
                        placements.push(p);
                    }
                }
            }
        }

        Self {
            logo,
            frame_size,
            placements,
        }
    }

    /// Frame size the overlay was laid out for.
    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    /// Number of logo copies stamped per frame.
    pub fn placement_count(&self) -> usize {
        self.placements.len()
    }

    /// Blend the logo into `data`.
    ///
    /// Returns false without touching the buffer when the layout does not
    /// match the frame.
    pub fn apply(&self, data: &mut [u8], info: &VideoInfo) -> bool {
        if info.size() != self.frame_size || data.len() != info.buffer_size() {
            return false;
        }

        let bpp = info.format.bytes_per_pixel();
        let stride = info.stride();
        for p in &self.placements {
            for row in 0..p.height {
                let line = (p.dst_y + row) as usize * stride;
                for col in 0..p.width {
                    let logo_px = self.logo.pixel(p.src_x + col, p.src_y + row);
                    let alpha = logo_px[3] as u32;
                    if alpha == 0 {
                        continue;
                    }
                    let offset = line + (p.dst_x + col) as usize * bpp;
                    for channel in 0..3 {
                        let img = data[offset + channel] as u32;
                        data[offset + channel] =
                            (((255 - alpha) * img + alpha * logo_px[channel] as u32 + 254) / 255)
                                as u8;
                    }
                }
            }
        }
        true
    }
}

fn clip(x: i64, y: i64, w: u32, h: u32, fw: u32, fh: u32) -> Option<Placement> {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w as i64).min(fw as i64);
    let y1 = (y + h as i64).min(fh as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Placement {
        dst_x: x0 as u32,
        dst_y: y0 as u32,
        src_x: (x0 - x) as u32,
        src_y: (y0 - y) as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}
