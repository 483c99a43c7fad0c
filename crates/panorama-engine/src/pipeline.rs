//! State shared between the controller and its stage threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use panorama_ipc::{FrameSize, StopReason};
use panorama_media::{
    BoundedQueue, Frame, FrameSet, LatestValue, TimestampQueue, STITCHED_QUEUE_CAPACITY,
    SYNCED_QUEUE_CAPACITY,
};

use crate::events::EventSink;
use crate::metrics::MetricsCollector;
use crate::shutdown::FinishFlag;

/// Format of the open camera sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub frame_size: FrameSize,
    pub frame_rate: u32,
    pub num_sources: usize,
}

/// Format of the composited stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StitchFormat {
    pub frame_size: FrameSize,
    pub frame_rate: u32,
}

/// A sink queue that exists only while its sink is open.
pub(crate) type SinkSlot = RwLock<Option<Arc<TimestampQueue<Frame>>>>;

/// Handles every stage receives at construction.
///
/// The queues here outlive individual subsystems: synchronization feeds
/// `synced_show`/`synced_proc` whether or not stitching or previews run,
/// and the sink slots are filled and emptied as sinks open and close.
pub(crate) struct Pipeline {
    pub finish: Arc<FinishFlag>,
    pub events: EventSink,
    pub metrics: MetricsCollector,
    pub synced_show: Arc<BoundedQueue<FrameSet>>,
    pub synced_proc: Arc<BoundedQueue<FrameSet>>,
    pub stitched_show: Arc<BoundedQueue<Frame>>,
    pub send: SinkSlot,
    pub save: SinkSlot,
    pub latest_sources: LatestValue<FrameSet>,
    pub latest_stitched: LatestValue<Frame>,
    pub synced_once: AtomicBool,
}

impl Pipeline {
    pub fn new(events: EventSink) -> Self {
        let pipeline = Self {
            finish: Arc::new(FinishFlag::new()),
            events,
            metrics: MetricsCollector::new(),
            synced_show: Arc::new(BoundedQueue::drop_oldest(SYNCED_QUEUE_CAPACITY)),
            synced_proc: Arc::new(BoundedQueue::drop_oldest(SYNCED_QUEUE_CAPACITY)),
            stitched_show: Arc::new(BoundedQueue::drop_oldest(STITCHED_QUEUE_CAPACITY)),
            send: RwLock::new(None),
            save: RwLock::new(None),
            latest_sources: LatestValue::new(),
            latest_stitched: LatestValue::new(),
            synced_once: AtomicBool::new(false),
        };
        pipeline.watch_shared();
        pipeline
    }

    fn watch_shared(&self) {
        self.finish.watch(&self.synced_show);
        self.finish.watch(&self.synced_proc);
        self.finish.watch(&self.stitched_show);
    }

    /// Raise the finish flag for a fatal stage error.
    pub fn fail(&self, reason: StopReason) {
        let message = reason.message();
        if self.finish.finish(reason) {
            error!(%message, "Task finished");
            self.events.log(message);
        }
    }

    /// Hand a frame to every open sink.
    pub fn fan_out(&self, frame: &Frame) {
        let send = self.send.read().clone();
        if let Some(queue) = send {
            queue.push(frame.clone());
        }
        let save = self.save.read().clone();
        if let Some(queue) = save {
            queue.push(frame.clone());
        }
    }

    pub fn has_finished(&self) -> bool {
        self.finish.is_finished()
    }

    /// Entries evicted from the shared drop-oldest queues.
    pub fn shared_drops(&self) -> u64 {
        self.synced_show.dropped() + self.synced_proc.dropped() + self.stitched_show.dropped()
    }

    /// Return to the freshly constructed state after a finish.
    pub fn reset(&self) {
        self.finish.reset();
        self.synced_show.restart();
        self.synced_proc.restart();
        self.stitched_show.restart();
        self.watch_shared();
        self.latest_sources.clear();
        self.latest_stitched.clear();
        self.synced_once.store(false, Ordering::SeqCst);
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use panorama_media::{OverflowPolicy, PixelFormat, VideoInfo, SINK_QUEUE_CAPACITY};

    fn frame(ts: i64) -> Frame {
        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(1, 1));
        Frame::video(info, ts, Bytes::from_static(&[1, 2, 3]))
    }

    #[test]
    fn test_fail_stops_shared_queues_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = Pipeline::new(EventSink::new(Some(tx)));

        pipeline.fail(StopReason::RenderFailed {
            message: "gpu lost".into(),
        });
        pipeline.fail(StopReason::UserRequested);

        assert!(pipeline.has_finished());
        assert!(pipeline.synced_show.is_stopped());
        assert!(pipeline.stitched_show.is_stopped());
        assert_eq!(rx.try_iter().count(), 1);

        pipeline.reset();
        assert!(!pipeline.has_finished());
        assert!(!pipeline.synced_proc.is_stopped());
        assert!(pipeline.synced_proc.push(FrameSet::default()));
    }

    #[test]
    fn test_fan_out_only_to_open_sinks() {
        let pipeline = Pipeline::new(EventSink::default());
        pipeline.fan_out(&frame(0));

        let save = Arc::new(TimestampQueue::new(SINK_QUEUE_CAPACITY, OverflowPolicy::ForceWait));
        *pipeline.save.write() = Some(Arc::clone(&save));
        pipeline.fan_out(&frame(10));

        assert_eq!(save.len(), 1);
        assert_eq!(save.pull().map(|f| f.data().clone()), Some(Bytes::from_static(&[1, 2, 3])));
    }
}
