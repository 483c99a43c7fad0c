//! Synchronization thread: aligns the camera queues into frame-sets.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use panorama_ipc::{StopReason, TaskEvent};

use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;
use crate::sync::{SyncHalt, SyncNotice, Synchronizer};

/// Publishes aligned frame-sets to the preview and processing queues.
pub(crate) struct SyncStage {
    pub sync: Synchronizer,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl SyncStage {
    #[instrument(name = "sync", skip(self), fields(sources = self.sync.source_count()))]
    pub fn run(mut self) {
        info!("Video sync thread started");
        let pipeline = Arc::clone(&self.pipeline);

        while !self.token.should_exit() {
            match self.sync.next_set(|notice| report(&pipeline, notice)) {
                Ok(set) => {
                    pipeline.metrics.record_synced();
                    pipeline.synced_once.store(true, Ordering::Relaxed);
                    pipeline.latest_sources.set(set.clone());
                    pipeline.synced_show.push(set.clone());
                    pipeline.synced_proc.push(set);
                }
                Err(SyncHalt::Stopped) => {
                    debug!("Source queue stopped");
                    break;
                }
                Err(SyncHalt::SourceEnded { index }) => {
                    pipeline.fail(StopReason::SourceEnded { index });
                    break;
                }
            }
        }

        info!("Video sync thread exited");
    }
}

fn report(pipeline: &Pipeline, notice: SyncNotice) {
    match notice {
        SyncNotice::Aligned {
            reference,
            discarded,
        } => {
            debug!(reference, discarded, "Sources aligned");
            pipeline
                .events
                .log(format!("Video sources synchronized to source {reference}"));
        }
        SyncNotice::CatchUpExceeded { index, discarded } => {
            warn!(index, discarded, "Source could not catch up, realigning");
            pipeline.events.log(format!(
                "Video source {index} discarded {discarded} frames without catching up, realigning"
            ));
        }
        SyncNotice::Drift { spread_us } => {
            warn!(spread_us, "Sources drifted apart, resynchronizing");
            pipeline.metrics.record_resync();
            pipeline
                .events
                .send(TaskEvent::Resynchronized { spread_us });
            pipeline.events.log(format!(
                "Video sources drifted by {spread_us} us, resynchronizing"
            ));
        }
    }
}
