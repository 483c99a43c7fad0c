//! Image helpers applied by the sinks.

use bytes::BytesMut;

use panorama_ipc::FrameSize;

use crate::frame::{Frame, Timestamped, VideoInfo};

/// Nearest-neighbour resize of a video frame.
///
/// Returns a clone sharing the same buffer when the size already matches,
/// and `None` for non-video frames or an empty target size.
pub fn resize_nearest(frame: &Frame, size: FrameSize) -> Option<Frame> {
    let src = frame.video_info()?;
    if size.is_empty() || src.size().is_empty() {
        return None;
    }
    if src.size() == size {
        return Some(frame.clone());
    }

    let dst = VideoInfo::new(src.format, size);
    let bpp = src.format.bytes_per_pixel();
    let src_stride = src.stride();
    let dst_stride = dst.stride();
    let data = frame.data();

    let x_map: Vec<usize> = (0..dst.width as usize)
        .map(|x| (x * src.width as usize / dst.width as usize) * bpp)
        .collect();

    let mut out = BytesMut::zeroed(dst.buffer_size());
    for (y, dst_row) in out.chunks_exact_mut(dst_stride).enumerate() {
        let sy = y * src.height as usize / dst.height as usize;
        let src_row = &data[sy * src_stride..(sy + 1) * src_stride];
        for (dst_px, &sx) in dst_row.chunks_exact_mut(bpp).zip(&x_map) {
            dst_px.copy_from_slice(&src_row[sx..sx + bpp]);
        }
    }

    Some(Frame::video(dst, frame.timestamp_us(), out.freeze()))
}
