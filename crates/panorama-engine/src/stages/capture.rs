//! Per-camera capture thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use panorama_capture::FrameReader;
use panorama_ipc::{StopReason, TaskEvent};
use panorama_media::{BoundedQueue, Frame, FrameRateEstimator, Timestamped};

use super::FPS_WARMUP;
use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;

/// Allowed difference between measured and configured capture rate.
const RATE_TOLERANCE_FPS: f64 = 2.0;

/// Reads one camera into its private queue.
pub(crate) struct CaptureStage {
    pub index: usize,
    pub reader: Box<dyn FrameReader>,
    pub queue: Arc<BoundedQueue<Frame>>,
    /// Every source queue, this one included.
    pub siblings: Vec<Arc<BoundedQueue<Frame>>>,
    pub frame_rate: u32,
    /// Frames discarded before the first one is queued.
    pub skip: u32,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl CaptureStage {
    #[instrument(name = "capture", skip(self), fields(index = self.index))]
    pub fn run(mut self) {
        info!("Video source thread started");
        let mut estimator = FrameRateEstimator::new(self.frame_rate, FPS_WARMUP);
        let mut skipped = 0u32;
        let mut rejected = 0u64;

        while !self.token.should_exit() {
            match self.reader.read() {
                Ok(_) if skipped < self.skip => {
                    skipped += 1;
                    if skipped == self.skip {
                        debug!(skipped, "Start-up frames skipped");
                    }
                }
                Ok(frame) if frame.timestamp_us() < 0 => {
                    // A negative timestamp would read as end-of-stream downstream.
                    if rejected == 0 {
                        warn!(ts = frame.timestamp_us(), "Dropping frame with negative timestamp");
                    }
                    rejected += 1;
                }
                Ok(frame) => {
                    self.queue.push(frame);
                    self.pipeline.metrics.record_captured();
                    if let Some(fps) = estimator.tick() {
                        self.report_rate(&estimator, fps);
                    }
                }
                Err(e) => {
                    if !self.token.should_exit() {
                        self.pipeline.fail(StopReason::SourceReadFailed {
                            index: self.index,
                            message: e.to_string(),
                        });
                        self.queue.push(Frame::end_of_stream());
                    }
                    for queue in &self.siblings {
                        queue.stop();
                    }
                    break;
                }
            }
        }

        self.reader.close();
        info!(frames = estimator.frames(), rejected, "Video source thread exited");
    }

    fn report_rate(&self, estimator: &FrameRateEstimator, fps: f64) {
        debug!(fps, "Capture frame rate");
        if self.index == 0 {
            self.pipeline.events.send(TaskEvent::SourceFrameRate { fps });
        }
        if self.pipeline.synced_once.load(Ordering::Relaxed)
            && estimator.deviates(fps, RATE_TOLERANCE_FPS)
        {
            warn!(fps, target = self.frame_rate, "Capture frame rate deviates from target");
            self.pipeline.events.log(format!(
                "Video source {} frame rate {:.1} fps, expected {} fps",
                self.index, fps, self.frame_rate
            ));
        }
    }
}
