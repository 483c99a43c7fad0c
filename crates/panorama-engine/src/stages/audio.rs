//! Audio capture thread.

use std::sync::Arc;

use tracing::{info, instrument};

use panorama_capture::FrameReader;
use panorama_ipc::StopReason;

use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;

/// Reads the audio device straight into the open sinks.
pub(crate) struct AudioStage {
    pub reader: Box<dyn FrameReader>,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl AudioStage {
    #[instrument(name = "audio", skip(self))]
    pub fn run(mut self) {
        info!("Audio source thread started");
        let mut frames = 0u64;

        while !self.token.should_exit() {
            match self.reader.read() {
                Ok(frame) => {
                    self.pipeline.metrics.record_audio();
                    self.pipeline.fan_out(&frame);
                    frames += 1;
                }
                Err(e) => {
                    if !self.token.should_exit() {
                        self.pipeline.fail(StopReason::AudioReadFailed {
                            message: e.to_string(),
                        });
                    }
                    break;
                }
            }
        }

        self.reader.close();
        info!(frames, "Audio source thread exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use panorama_capture::{ReaderOptions, ToneReader};
    use panorama_media::{OverflowPolicy, TimestampQueue, SINK_QUEUE_CAPACITY};

    use crate::stages::testing::Harness;

    #[test]
    fn test_audio_fans_out_until_read_fails() {
        let harness = Harness::new();
        let save = Arc::new(TimestampQueue::new(SINK_QUEUE_CAPACITY, OverflowPolicy::ForceWait));
        *harness.pipeline.save.write() = Some(Arc::clone(&save));

        let mut reader = ToneReader::new();
        reader
            .open("test://tone?paced=false&fail_at=3", &ReaderOptions::default())
            .unwrap();
        AudioStage {
            reader: Box::new(reader),
            token: harness.token(),
            pipeline: Arc::clone(&harness.pipeline),
        }
        .run();

        assert_eq!(save.len(), 3);
        assert!(save.pull().is_some_and(|f| f.is_audio()));
        assert_eq!(harness.pipeline.metrics.snapshot(0).audio_frames, 3);
        assert!(matches!(
            harness.pipeline.finish.reason(),
            Some(StopReason::AudioReadFailed { .. })
        ));
    }
}
