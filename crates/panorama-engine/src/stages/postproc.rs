//! Post-processing thread: overlay, freeze, fan out.

use std::sync::Arc;

use tracing::{info, instrument};

use panorama_media::{BoundedQueue, Frame, FramePool, LogoOverlay};

use super::Composite;
use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;

/// Stamps the overlay and fans each panorama out to its consumers.
pub(crate) struct PostProcStage {
    pub input: Arc<BoundedQueue<Composite>>,
    /// Takes the frozen buffers back once every consumer has let go.
    pub pool: Arc<FramePool>,
    pub overlay: Option<LogoOverlay>,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl PostProcStage {
    #[instrument(name = "postproc", skip(self))]
    pub fn run(self) {
        info!("Post process thread started");
        let mut frames = 0u64;

        while let Some(mut composite) = self.input.pull() {
            if self.token.should_exit() {
                break;
            }
            if let Some(overlay) = &self.overlay {
                overlay.apply(&mut composite.data, &composite.info);
            }

            let data = composite.data.freeze();
            self.pool.recycle(&data);
            let frame = Frame::video(composite.info, composite.timestamp_us, data);
            self.pipeline.latest_stitched.set(frame.clone());
            self.pipeline.stitched_show.push(frame.clone());
            self.pipeline.fan_out(&frame);
            frames += 1;
        }

        info!(frames, "Post process thread exited");
    }
}
