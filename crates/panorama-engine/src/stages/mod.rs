//! Stage threads of the pipeline.
//!
//! Each stage is a plain struct holding everything its thread needs; the
//! controller builds it, moves it into a [`StageGroup`](crate::supervisor::StageGroup)
//! thread, and the thread calls `run`. Stages never share mutable frames:
//! they hand off through the bounded queues and the latest-value caches.

mod audio;
mod capture;
mod composite;
mod postproc;
mod preview;
mod sink;
mod synchronize;

pub(crate) use audio::AudioStage;
pub(crate) use capture::CaptureStage;
pub(crate) use composite::{Composite, CompositeStage};
pub(crate) use postproc::PostProcStage;
pub(crate) use preview::PreviewStage;
pub(crate) use sink::{FileSaveStage, StreamSendStage};
pub(crate) use synchronize::SyncStage;

use std::time::Duration;

use panorama_ipc::FrameSize;
use panorama_media::{resize_nearest, Frame, SINK_QUEUE_CAPACITY, STITCHED_QUEUE_CAPACITY};

/// Frames ignored by the frame-rate estimators after start.
const FPS_WARMUP: Duration = Duration::from_secs(5);

/// Sleep of the compositing loop when no frame-set is waiting.
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Composited buffers the stitch pool tracks: enough for every queue a
/// panorama can sit in, plus the ones being drawn.
pub(crate) const STITCH_POOL_CAPACITY: usize =
    2 * SINK_QUEUE_CAPACITY + 2 * STITCHED_QUEUE_CAPACITY + 4;

/// Pause between preview callbacks at `fps`.
pub(crate) fn preview_wait(fps: u32) -> Duration {
    if fps == 0 {
        return Duration::from_millis(10);
    }
    let interval = (1000.0 / fps as f64).round() as i64;
    Duration::from_millis((interval - 2).max(5) as u64)
}

/// A copy of `frame` at `size`, or `None` when it already fits (or is audio).
fn resized(frame: &Frame, size: FrameSize) -> Option<Frame> {
    match frame.video_info() {
        Some(info) if info.size() != size => resize_nearest(frame, size),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the stage tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use crossbeam_channel::Receiver;
    use panorama_ipc::{FrameSize, TaskEvent};
    use panorama_media::{Frame, PixelFormat, VideoInfo};

    use crate::events::EventSink;
    use crate::pipeline::Pipeline;
    use crate::shutdown::StageToken;

    pub const SIZE: FrameSize = FrameSize::new(4, 2);

    pub fn frame(ts: i64) -> Frame {
        let info = VideoInfo::new(PixelFormat::Bgr24, SIZE);
        Frame::video(info, ts, Bytes::from(vec![ts as u8; info.buffer_size()]))
    }

    /// A pipeline with its event receiver and one subsystem end flag.
    pub struct Harness {
        pub pipeline: Arc<Pipeline>,
        pub events: Receiver<TaskEvent>,
        end: Arc<AtomicBool>,
    }

    impl Harness {
        pub fn new() -> Self {
            let (tx, events) = crossbeam_channel::unbounded();
            Self {
                pipeline: Arc::new(Pipeline::new(EventSink::new(Some(tx)))),
                events,
                end: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn token(&self) -> StageToken {
            StageToken::new(Arc::clone(&self.pipeline.finish), Arc::clone(&self.end))
        }

        /// Raise the subsystem end flag, as closing the subsystem does.
        pub fn end(&self) {
            self.end.store(true, Ordering::SeqCst);
        }

        pub fn logs(&self) -> Vec<String> {
            self.events
                .try_iter()
                .filter_map(|e| match e {
                    TaskEvent::Log { message } => Some(message),
                    _ => None,
                })
                .collect()
        }
    }
}
