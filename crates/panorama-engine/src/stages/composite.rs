//! Compositing thread: frame-sets in, rendered panoramas out.

use std::sync::Arc;
use std::thread;

use bytes::BytesMut;
use tracing::{debug, info, instrument, trace};

use panorama_ipc::{StopReason, TaskEvent};
use panorama_media::{
    BoundedQueue, FramePool, FrameRateEstimator, FrameSet, Timestamped, VideoInfo,
};
use panorama_render::{PanoramaRender, RenderLayout};

use super::{FPS_WARMUP, IDLE_POLL};
use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;

/// A rendered panorama still owned by the pipeline; post-processing
/// draws on it before it is frozen into a shared frame.
pub(crate) struct Composite {
    pub info: VideoInfo,
    pub timestamp_us: i64,
    pub data: BytesMut,
}

/// Renders frame-sets into panoramas.
pub(crate) struct CompositeStage {
    pub render: Box<dyn PanoramaRender>,
    pub layout: RenderLayout,
    pub input: Arc<BoundedQueue<FrameSet>>,
    pub output: Arc<BoundedQueue<Composite>>,
    pub pool: Arc<FramePool>,
    pub frame_rate: u32,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl CompositeStage {
    #[instrument(name = "composite", skip(self), fields(backend = self.render.name()))]
    pub fn run(mut self) {
        info!("Video stitch thread started");
        let info = self.layout.dst_info();
        let mut estimator = FrameRateEstimator::new(self.frame_rate, FPS_WARMUP);
        let mut skipped = 0u64;

        while !self.token.should_exit() {
            let Some(set) = self.input.try_pull() else {
                thread::sleep(IDLE_POLL);
                continue;
            };
            if let Err(e) = self.layout.check_sources(set.frames()) {
                trace!(error = %e, "Skipping frame-set that does not fit the layout");
                skipped += 1;
                continue;
            }

            let mut data = self.pool.acquire();
            if let Err(e) = self.render.render(set.frames(), &mut data) {
                self.pipeline.fail(StopReason::RenderFailed {
                    message: e.to_string(),
                });
                break;
            }

            self.output.push(Composite {
                info,
                timestamp_us: set.timestamp_us(),
                data,
            });
            self.pipeline.metrics.record_stitched();

            if let Some(fps) = estimator.tick() {
                debug!(fps, "Stitch frame rate");
                self.pipeline.events.send(TaskEvent::StitchFrameRate { fps });
            }
        }

        info!(
            frames = estimator.frames(),
            skipped,
            allocated = self.pool.allocated(),
            reused = self.pool.reused(),
            "Video stitch thread exited"
        );
    }
}
