//! Raw frame container used by the file writer, file reader and TCP stream.
//!
//! Layout: the 4-byte magic `PVF1`, then one record per frame:
//!
//! ```text
//! u8  kind      0 = video, 1 = audio
//! u8  format    pixel or sample format tag
//! i64 timestamp microseconds
//! u32 a         width | channels
//! u32 b         height | sample rate
//! u32 length    payload bytes
//! [u8; length]  payload
//! ```
//!
//! All integers are big-endian.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;
use crate::frame::{
    AudioInfo, Frame, MediaInfo, PixelFormat, SampleFormat, Timestamped, VideoInfo,
};
use crate::MediaResult;

/// Magic bytes at the start of every container.
pub const CONTAINER_MAGIC: &[u8; 4] = b"PVF1";

const RECORD_HEADER_LEN: usize = 1 + 1 + 8 + 4 + 4 + 4;

const KIND_VIDEO: u8 = 0;
const KIND_AUDIO: u8 = 1;

/// Write the container magic.
pub fn write_header<W: Write>(writer: &mut W) -> MediaResult<()> {
    writer.write_all(CONTAINER_MAGIC)?;
    Ok(())
}

/// Read and check the container magic.
pub fn read_header<R: Read>(reader: &mut R) -> MediaResult<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => MediaError::BadMagic,
        _ => MediaError::Io(e),
    })?;
    if &magic != CONTAINER_MAGIC {
        return Err(MediaError::BadMagic);
    }
    Ok(())
}

/// Append one frame record to `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) -> MediaResult<()> {
    let (kind, format, a, b) = match frame.info() {
        MediaInfo::Video(info) => (KIND_VIDEO, pixel_tag(info.format), info.width, info.height),
        MediaInfo::Audio(info) => (
            KIND_AUDIO,
            sample_tag(info.format),
            info.channels as u32,
            info.sample_rate,
        ),
        MediaInfo::Empty => return Err(MediaError::EndOfStreamFrame),
    };

    buf.reserve(RECORD_HEADER_LEN + frame.data().len());
    buf.put_u8(kind);
    buf.put_u8(format);
    buf.put_i64(frame.timestamp_us());
    buf.put_u32(a);
    buf.put_u32(b);
    buf.put_u32(frame.data().len() as u32);
    buf.put_slice(frame.data());
    Ok(())
}

/// Read the next frame record; `Ok(None)` on a clean end of input.
pub fn read_frame<R: Read>(reader: &mut R) -> MediaResult<Option<Frame>> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    match read_full(reader, &mut header)? {
        0 => return Ok(None),
        n if n < RECORD_HEADER_LEN => return Err(MediaError::Truncated),
        _ => {}
    }

    let mut cursor = &header[..];
    let kind = cursor.get_u8();
    let format = cursor.get_u8();
    let timestamp_us = cursor.get_i64();
    let a = cursor.get_u32();
    let b = cursor.get_u32();
    let len = cursor.get_u32() as usize;

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? < len {
        return Err(MediaError::Truncated);
    }
    let data = Bytes::from(payload);

    let frame = match kind {
        KIND_VIDEO => {
            let info = VideoInfo {
                format: pixel_format(format)?,
                width: a,
                height: b,
            };
            if info.buffer_size() != len {
                return Err(MediaError::SizeMismatch {
                    expected: info.buffer_size(),
                    actual: len,
                });
            }
            Frame::video(info, timestamp_us, data)
        }
        KIND_AUDIO => {
            let info = AudioInfo {
                format: sample_format(format)?,
                channels: a as u16,
                sample_rate: b,
            };
            Frame::audio(info, timestamp_us, data)
        }
        other => return Err(MediaError::UnknownFormat(other)),
    };

    Ok(Some(frame))
}

/// Fill `buf` as far as the reader allows; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> MediaResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn pixel_tag(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Bgr24 => 0,
        PixelFormat::Bgr32 => 1,
    }
}

fn pixel_format(tag: u8) -> MediaResult<PixelFormat> {
    match tag {
        0 => Ok(PixelFormat::Bgr24),
        1 => Ok(PixelFormat::Bgr32),
        other => Err(MediaError::UnknownFormat(other)),
    }
}

fn sample_tag(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::S16 => 0,
        SampleFormat::F32 => 1,
    }
}

fn sample_format(tag: u8) -> MediaResult<SampleFormat> {
    match tag {
        0 => Ok(SampleFormat::S16),
        1 => Ok(SampleFormat::F32),
        other => Err(MediaError::UnknownFormat(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panorama_ipc::FrameSize;

    #[test]
    fn test_container_sequence() {
        let video_info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(2, 2));
        let video = Frame::video(video_info, 1_000, Bytes::from(vec![7u8; 12]));
        let audio_info = AudioInfo {
            format: SampleFormat::S16,
            channels: 2,
            sample_rate: 48_000,
        };
        let audio = Frame::audio(audio_info, 1_500, Bytes::from(vec![1u8; 16]));

        let mut file = Vec::new();
        write_header(&mut file).unwrap();
        let mut buf = BytesMut::new();
        encode_frame(&video, &mut buf).unwrap();
        encode_frame(&audio, &mut buf).unwrap();
        file.extend_from_slice(&buf);

        let mut reader = &file[..];
        read_header(&mut reader).unwrap();

        let first = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(first.video_info(), Some(&video_info));
        assert_eq!(first.data(), video.data());

        let second = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(second.audio_info(), Some(&audio_info));
        assert_eq!(second.sample_count(), 4);

        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut reader: &[u8] = b"MP4!";
        assert!(matches!(read_header(&mut reader), Err(MediaError::BadMagic)));

        let mut truncated: &[u8] = &[0, 1, 0, 0];
        assert!(matches!(read_frame(&mut truncated), Err(MediaError::Truncated)));

        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(&Frame::end_of_stream(), &mut buf),
            Err(MediaError::EndOfStreamFrame)
        ));
    }
}
