//! Sink threads feeding the live stream and the recording.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use panorama_ipc::{FrameSize, StopReason, TaskEvent};
use panorama_media::{Frame, TimestampQueue};
use panorama_output::{FrameWriter, SegmentedWriter};

use super::resized;
use crate::pipeline::Pipeline;
use crate::shutdown::StageToken;

/// Forwards frames to the live-stream writer.
pub(crate) struct StreamSendStage {
    pub writer: Box<dyn FrameWriter>,
    pub queue: Arc<TimestampQueue<Frame>>,
    pub frame_size: FrameSize,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl StreamSendStage {
    #[instrument(name = "stream_send", skip(self), fields(writer = self.writer.name()))]
    pub fn run(mut self) {
        info!("Live stream thread started");

        while let Some(frame) = self.queue.pull() {
            if self.token.should_exit() {
                break;
            }
            let scaled = resized(&frame, self.frame_size);
            let frame = scaled.as_ref().unwrap_or(&frame);

            if let Err(e) = self.writer.write(frame) {
                self.pipeline.fail(StopReason::StreamWriteFailed {
                    message: e.to_string(),
                });
                break;
            }
            if frame.is_video() {
                self.pipeline.metrics.record_sent();
            }
        }

        if let Err(e) = self.writer.close() {
            warn!("Live stream close failed: {}", e);
        }
        info!("Live stream thread exited");
    }
}

/// Writes frames into rolling segment files.
pub(crate) struct FileSaveStage {
    pub writer: SegmentedWriter,
    pub queue: Arc<TimestampQueue<Frame>>,
    pub frame_size: FrameSize,
    pub token: StageToken,
    pub pipeline: Arc<Pipeline>,
}

impl FileSaveStage {
    #[instrument(name = "file_save", skip(self))]
    pub fn run(mut self) {
        info!("File save thread started");

        while let Some(frame) = self.queue.pull() {
            if self.token.should_exit() {
                break;
            }
            let scaled = resized(&frame, self.frame_size);
            let frame = scaled.as_ref().unwrap_or(&frame);

            match self.writer.write(frame) {
                Ok(Some(roll)) => {
                    self.status(format!("Finish write local file {}", roll.finished.display()));
                    self.status(format!("Begin write local file {}", roll.begun.display()));
                }
                Ok(None) => {}
                Err(e) => {
                    self.pipeline.fail(StopReason::FileWriteFailed {
                        message: e.to_string(),
                    });
                    break;
                }
            }
            if frame.is_video() {
                self.pipeline.metrics.record_saved();
            }
        }

        match self.writer.finish() {
            Ok(Some(path)) => self.status(format!("Finish write local file {}", path.display())),
            Ok(None) => {}
            Err(e) => warn!("Closing segment failed: {}", e),
        }
        info!(segments = self.writer.segments(), "File save thread exited");
    }

    /// The segment writer already logs these; only forward them.
    fn status(&self, message: String) {
        self.pipeline.events.send(TaskEvent::Log { message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use parking_lot::Mutex;
    use panorama_media::{OverflowPolicy, Timestamped, SINK_QUEUE_CAPACITY};
    use panorama_output::{OutputError, OutputResult, SegmentPlan, WriterConfig};

    use crate::stages::testing::{self, Harness};

    /// Logs what it is asked to do and fails writes past `fail_after`.
    struct LoggingWriter {
        log: Arc<Mutex<Vec<String>>>,
        fail_after: usize,
        writes: usize,
        open: bool,
    }

    impl LoggingWriter {
        fn boxed(log: &Arc<Mutex<Vec<String>>>, fail_after: usize) -> Box<Self> {
            Box::new(Self {
                log: Arc::clone(log),
                fail_after,
                writes: 0,
                open: false,
            })
        }
    }

    impl FrameWriter for LoggingWriter {
        fn open(&mut self, config: &WriterConfig) -> OutputResult<()> {
            self.log.lock().push(format!("open {}", config.target));
            self.open = true;
            Ok(())
        }

        fn write(&mut self, frame: &Frame) -> OutputResult<()> {
            if self.writes == self.fail_after {
                return Err(OutputError::ConnectionFailed("peer reset".into()));
            }
            self.writes += 1;
            let size = frame.video_info().map(|i| i.size().to_string()).unwrap_or_default();
            self.log.lock().push(format!("write {} {size}", frame.timestamp_us()));
            Ok(())
        }

        fn close(&mut self) -> OutputResult<()> {
            if self.open {
                self.log.lock().push("close".into());
            }
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn name(&self) -> &'static str {
            "logging"
        }
    }

    fn queue(stamps: &[i64]) -> Arc<TimestampQueue<Frame>> {
        let queue = Arc::new(TimestampQueue::new(SINK_QUEUE_CAPACITY, OverflowPolicy::ForceWait));
        for &ts in stamps {
            queue.push(testing::frame(ts));
        }
        queue.stop();
        queue
    }

    fn file_stage(
        harness: &Harness,
        log: &Arc<Mutex<Vec<String>>>,
        fail_after: usize,
        stamps: &[i64],
    ) -> FileSaveStage {
        let config = WriterConfig {
            target: String::new(),
            container: "pvf".into(),
            video: None,
            audio: None,
        };
        FileSaveStage {
            writer: SegmentedWriter::new(
                LoggingWriter::boxed(log, fail_after),
                SegmentPlan::new(Path::new("rec"), "pano", 1),
                config,
            ),
            queue: queue(stamps),
            frame_size: testing::SIZE,
            token: harness.token(),
            pipeline: Arc::clone(&harness.pipeline),
        }
    }

    #[test]
    fn test_stream_resizes_and_counts() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut writer = LoggingWriter::boxed(&log, usize::MAX);
        writer.open = true;

        StreamSendStage {
            writer,
            queue: queue(&[66, 0, 33]),
            frame_size: FrameSize::new(2, 1),
            token: harness.token(),
            pipeline: Arc::clone(&harness.pipeline),
        }
        .run();

        assert_eq!(
            *log.lock(),
            vec!["write 0 2x1", "write 33 2x1", "write 66 2x1", "close"]
        );
        assert_eq!(harness.pipeline.metrics.snapshot(0).frames_sent, 3);
        assert!(!harness.pipeline.has_finished());
    }

    #[test]
    fn test_stream_write_failure_finishes_task() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut writer = LoggingWriter::boxed(&log, 1);
        writer.open = true;

        StreamSendStage {
            writer,
            queue: queue(&[0, 33, 66]),
            frame_size: testing::SIZE,
            token: harness.token(),
            pipeline: Arc::clone(&harness.pipeline),
        }
        .run();

        assert!(matches!(
            harness.pipeline.finish.reason(),
            Some(StopReason::StreamWriteFailed { message }) if message.contains("peer reset")
        ));
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
        assert_eq!(harness.pipeline.metrics.snapshot(0).frames_sent, 1);
    }

    #[test]
    fn test_file_save_rolls_and_reports() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        file_stage(&harness, &log, usize::MAX, &[0, 500_000, 1_200_000]).run();

        let opened: Vec<String> = log
            .lock()
            .iter()
            .filter(|line| line.starts_with("open"))
            .cloned()
            .collect();
        assert_eq!(opened.len(), 2);
        assert!(opened[1].ends_with("pano1.pvf"));

        let logs = harness.logs();
        assert!(logs[0].starts_with("Finish write local file") && logs[0].ends_with("pano0.pvf"));
        assert!(logs[1].starts_with("Begin write local file") && logs[1].ends_with("pano1.pvf"));
        assert!(logs[2].ends_with("pano1.pvf"));
        assert_eq!(harness.pipeline.metrics.snapshot(0).frames_saved, 3);
    }

    #[test]
    fn test_file_write_failure_finishes_task() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        file_stage(&harness, &log, 0, &[0, 33]).run();

        assert!(matches!(
            harness.pipeline.finish.reason(),
            Some(StopReason::FileWriteFailed { .. })
        ));
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
        assert_eq!(harness.pipeline.metrics.snapshot(0).frames_saved, 0);
    }
}
