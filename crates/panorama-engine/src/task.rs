//! The panorama task controller.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{info, instrument, warn};

use panorama_capture::{FrameReader, ReaderOptions};
use panorama_ipc::{
    AudioSourceConfig, LiveStreamConfig, RecordConfig, StitchConfig, StopReason, Subsystem,
    SubsystemState, TaskEvent, TaskMetrics, VideoSourceConfig,
};
use panorama_media::{
    BoundedQueue, Frame, FramePool, FrameSet, Logo, LogoOverlay, OverflowPolicy, TimestampQueue,
    SINK_QUEUE_CAPACITY, SOURCE_QUEUE_CAPACITY, STITCHED_QUEUE_CAPACITY,
};
use panorama_output::{SegmentPlan, SegmentedWriter, WriterConfig};
use panorama_render::RenderLayout;

use crate::devices::{DeviceFactory, SystemDevices};
use crate::events::EventSink;
use crate::pipeline::{Pipeline, StitchFormat, VideoFormat};
use crate::stages::{
    preview_wait, AudioStage, CaptureStage, Composite, CompositeStage, FileSaveStage,
    PostProcStage, PreviewStage, StreamSendStage, SyncStage, STITCH_POOL_CAPACITY,
};
use crate::supervisor::StageGroup;
use crate::sync::{SyncParams, Synchronizer};
use crate::{TaskError, TaskResult};

/// Callback receiving synchronized source frame-sets.
pub type SourceFramesCallback = Box<dyn FnMut(&FrameSet) + Send>;

/// Callback receiving stitched panoramas.
pub type StitchedFrameCallback = Box<dyn FnMut(&Frame) + Send>;

/// Owns every subsystem of one live panorama task.
///
/// Subsystems open independently (`open_*`/`begin_*`) and close
/// independently (`close_*`/`stop_*`). A fatal error in any stage raises
/// the shared finish flag; after that, opens are rejected until
/// [`reset`](Self::reset).
pub struct PanoramaTask {
    devices: Arc<dyn DeviceFactory>,
    pipeline: Arc<Pipeline>,
    states: HashMap<Subsystem, SubsystemState>,
    groups: HashMap<Subsystem, StageGroup>,
    video: Option<VideoFormat>,
    stitch: Option<StitchFormat>,
    sources: Vec<Arc<BoundedQueue<Frame>>>,
    stitched: Option<Arc<BoundedQueue<Composite>>>,
}

impl PanoramaTask {
    /// Task using the built-in devices.
    pub fn new(events: Option<Sender<TaskEvent>>) -> Self {
        Self::with_devices(Arc::new(SystemDevices), events)
    }

    /// Task opening devices through `devices`.
    pub fn with_devices(devices: Arc<dyn DeviceFactory>, events: Option<Sender<TaskEvent>>) -> Self {
        Self {
            devices,
            pipeline: Arc::new(Pipeline::new(EventSink::new(events))),
            states: HashMap::new(),
            groups: HashMap::new(),
            video: None,
            stitch: None,
            sources: Vec::new(),
            stitched: None,
        }
    }

    // ----------------------------------------------------------------
    // Video sources
    // ----------------------------------------------------------------

    /// Open every camera and start capture and synchronization.
    #[instrument(name = "open_video_devices", skip(self, config), fields(devices = config.devices.len()))]
    pub fn open_video_devices(&mut self, config: &VideoSourceConfig) -> TaskResult<()> {
        self.check_can_open(Subsystem::VideoDevices, None)?;
        if config.devices.is_empty() {
            return Err(self.open_failed(TaskError::InvalidConfig(
                "no video devices configured".into(),
            )));
        }
        if config.frame_rate == 0 || config.frame_size.is_empty() {
            return Err(self.open_failed(TaskError::InvalidConfig(format!(
                "invalid video format {} @ {} fps",
                config.frame_size, config.frame_rate
            ))));
        }
        if !config.skip_frames.is_empty() && config.skip_frames.len() != config.devices.len() {
            return Err(self.open_failed(TaskError::InvalidConfig(format!(
                "{} skip counts for {} video devices",
                config.skip_frames.len(),
                config.devices.len()
            ))));
        }

        let options = ReaderOptions::video(config);
        let mut readers: Vec<Box<dyn FrameReader>> = Vec::with_capacity(config.devices.len());
        for (index, device) in config.devices.iter().enumerate() {
            let opened = self.devices.video_reader(device).and_then(|mut reader| {
                reader.open(device, &options)?;
                Ok(reader)
            });
            match opened {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    for reader in &mut readers {
                        reader.close();
                    }
                    return Err(self.open_failed(TaskError::device_open(
                        Subsystem::VideoDevices,
                        format!("source {index} ({device}): {e}"),
                    )));
                }
            }
        }
        self.pipeline
            .events
            .log(format!("Video sources open success ({} sources)", readers.len()));

        let queues: Vec<Arc<BoundedQueue<Frame>>> = (0..readers.len())
            .map(|_| Arc::new(BoundedQueue::drop_oldest(SOURCE_QUEUE_CAPACITY)))
            .collect();
        self.pipeline.synced_show.clear();
        self.pipeline.synced_proc.clear();
        self.pipeline.latest_sources.clear();
        self.pipeline.synced_once.store(false, Ordering::SeqCst);

        let mut group = StageGroup::new(Subsystem::VideoDevices);
        if let Err(e) = self.spawn_video_stages(&mut group, readers, &queues, config) {
            group.shutdown();
            return Err(self.open_failed(e));
        }

        self.sources = queues;
        self.video = Some(VideoFormat {
            frame_size: config.frame_size,
            frame_rate: config.frame_rate,
            num_sources: config.devices.len(),
        });
        self.pipeline.metrics.start();
        self.opened(Subsystem::VideoDevices, group);
        Ok(())
    }

    fn spawn_video_stages(
        &self,
        group: &mut StageGroup,
        readers: Vec<Box<dyn FrameReader>>,
        queues: &[Arc<BoundedQueue<Frame>>],
        config: &VideoSourceConfig,
    ) -> TaskResult<()> {
        for queue in queues {
            self.pipeline.finish.watch(queue);
            group.watch(queue.clone());
        }

        for (index, reader) in readers.into_iter().enumerate() {
            let stage = CaptureStage {
                index,
                reader,
                queue: Arc::clone(&queues[index]),
                siblings: queues.to_vec(),
                frame_rate: config.frame_rate,
                skip: config.skip_for(index),
                token: group.token(&self.pipeline.finish),
                pipeline: Arc::clone(&self.pipeline),
            };
            group.spawn(format!("capture-{index}"), move || stage.run())?;
        }

        let stage = SyncStage {
            sync: Synchronizer::new(
                queues.to_vec(),
                SyncParams::new(config.frame_rate, &config.sync),
            ),
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        group.spawn("sync", move || stage.run())
    }

    /// Stop capture and synchronization.
    pub fn close_video_devices(&mut self) {
        if self.close(Subsystem::VideoDevices) {
            self.sources.clear();
            self.video = None;
            self.pipeline.events.log("Video sources closed");
        }
    }

    // ----------------------------------------------------------------
    // Audio source
    // ----------------------------------------------------------------

    /// Open the audio device and start feeding the sinks.
    #[instrument(name = "open_audio_device", skip(self, config), fields(device = %config.device))]
    pub fn open_audio_device(&mut self, config: &AudioSourceConfig) -> TaskResult<()> {
        self.check_can_open(Subsystem::AudioDevice, None)?;

        let options = ReaderOptions::audio(config);
        let reader = self
            .devices
            .audio_reader(&config.device)
            .and_then(|mut reader| {
                reader.open(&config.device, &options)?;
                Ok(reader)
            })
            .map_err(|e| self.open_failed(TaskError::device_open(Subsystem::AudioDevice, e)))?;
        self.pipeline.events.log("Audio source open success");

        let mut group = StageGroup::new(Subsystem::AudioDevice);
        let stage = AudioStage {
            reader,
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        if let Err(e) = group.spawn("audio", move || stage.run()) {
            group.shutdown();
            return Err(self.open_failed(e));
        }

        self.pipeline.metrics.start();
        self.opened(Subsystem::AudioDevice, group);
        Ok(())
    }

    /// Stop audio capture.
    pub fn close_audio_device(&mut self) {
        if self.close(Subsystem::AudioDevice) {
            self.pipeline.events.log("Audio source closed");
        }
    }

    // ----------------------------------------------------------------
    // Stitching
    // ----------------------------------------------------------------

    /// Prepare the render backend and start compositing.
    #[instrument(name = "begin_video_stitch", skip(self, config), fields(backend = ?config.backend))]
    pub fn begin_video_stitch(&mut self, config: &StitchConfig) -> TaskResult<()> {
        self.check_can_open(Subsystem::Stitch, Some(Subsystem::VideoDevices))?;
        let Some(video) = self.video else {
            return Err(TaskError::NotReady {
                subsystem: Subsystem::Stitch,
                requires: Subsystem::VideoDevices,
            });
        };
        if config.frame_size.is_empty() {
            return Err(self.open_failed(TaskError::InvalidConfig(format!(
                "invalid stitch size {}",
                config.frame_size
            ))));
        }

        let mut render = self.devices.render(config.backend);
        if let Err(e) = render.prepare(
            config.config_path.as_deref(),
            video.frame_size,
            config.frame_size,
            video.num_sources,
        ) {
            self.pipeline.events.log("Video stitch prepare failed");
            return Err(self.open_failed(TaskError::device_open(Subsystem::Stitch, e)));
        }
        self.pipeline.events.log("Video stitch prepare success");

        let layout = RenderLayout {
            src_size: video.frame_size,
            dst_size: config.frame_size,
            num_sources: video.num_sources,
        };
        let stitched: Arc<BoundedQueue<Composite>> =
            Arc::new(BoundedQueue::drop_oldest(STITCHED_QUEUE_CAPACITY));
        let pool = Arc::new(FramePool::new(
            layout.dst_info().buffer_size(),
            STITCH_POOL_CAPACITY,
        ));
        self.pipeline.synced_proc.clear();
        self.pipeline.stitched_show.clear();
        self.pipeline.latest_stitched.clear();

        let mut group = StageGroup::new(Subsystem::Stitch);
        self.pipeline.finish.watch(&stitched);
        group.watch(stitched.clone());

        let composite = CompositeStage {
            render,
            layout,
            input: Arc::clone(&self.pipeline.synced_proc),
            output: Arc::clone(&stitched),
            pool: Arc::clone(&pool),
            frame_rate: video.frame_rate,
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        let postproc = PostProcStage {
            input: Arc::clone(&stitched),
            pool,
            overlay: config
                .logo
                .then(|| LogoOverlay::new(Logo::badge(), config.frame_size)),
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        let spawned = group
            .spawn("composite", move || composite.run())
            .and_then(|_| group.spawn("postproc", move || postproc.run()));
        if let Err(e) = spawned {
            group.shutdown();
            return Err(self.open_failed(e));
        }

        self.stitched = Some(stitched);
        self.stitch = Some(StitchFormat {
            frame_size: config.frame_size,
            frame_rate: video.frame_rate,
        });
        self.opened(Subsystem::Stitch, group);
        self.pipeline.events.log("Video stitch thread create success");
        Ok(())
    }

    /// Stop compositing and post-processing.
    pub fn stop_video_stitch(&mut self) {
        if self.close(Subsystem::Stitch) {
            self.stitched = None;
            self.stitch = None;
            self.pipeline.events.log("Video stitch stopped");
        }
    }

    // ----------------------------------------------------------------
    // Live stream
    // ----------------------------------------------------------------

    /// Open the live-stream writer and start sending.
    #[instrument(name = "open_live_stream", skip(self, config), fields(url = %config.url))]
    pub fn open_live_stream(&mut self, config: &LiveStreamConfig) -> TaskResult<()> {
        let stitch = self.stitch_for(Subsystem::LiveStream)?;
        if config.frame_size.is_empty() {
            return Err(self.open_failed(TaskError::InvalidConfig(format!(
                "invalid stream size {}",
                config.frame_size
            ))));
        }

        let has_audio = self.state(Subsystem::AudioDevice).is_open();
        let writer_config = WriterConfig::stream(config, stitch.frame_rate, has_audio);
        let writer = self
            .devices
            .stream_writer(&config.url)
            .and_then(|mut writer| {
                writer.open(&writer_config)?;
                Ok(writer)
            });
        let writer = match writer {
            Ok(writer) => writer,
            Err(e) => {
                self.pipeline.events.log("Live stream open failed");
                return Err(self.open_failed(TaskError::device_open(Subsystem::LiveStream, e)));
            }
        };
        self.pipeline.events.log("Live stream open success");

        let queue: Arc<TimestampQueue<Frame>> = Arc::new(TimestampQueue::new(
            SINK_QUEUE_CAPACITY,
            OverflowPolicy::ForceWait,
        ));
        let mut group = StageGroup::new(Subsystem::LiveStream);
        self.pipeline.finish.watch(&queue);
        group.watch(queue.clone());

        let stage = StreamSendStage {
            writer,
            queue: Arc::clone(&queue),
            frame_size: config.frame_size,
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        if let Err(e) = group.spawn("stream-send", move || stage.run()) {
            group.shutdown();
            return Err(self.open_failed(e));
        }

        *self.pipeline.send.write() = Some(queue);
        self.opened(Subsystem::LiveStream, group);
        self.pipeline.events.log("Live stream thread create success");
        Ok(())
    }

    /// Stop sending and close the live-stream writer.
    pub fn close_live_stream(&mut self) {
        *self.pipeline.send.write() = None;
        if self.close(Subsystem::LiveStream) {
            self.pipeline.events.log("Live stream closed");
        }
    }

    // ----------------------------------------------------------------
    // Recording
    // ----------------------------------------------------------------

    /// Start writing rolling segment files.
    #[instrument(name = "begin_save_to_disk", skip(self, config), fields(dir = %config.dir.display()))]
    pub fn begin_save_to_disk(&mut self, config: &RecordConfig) -> TaskResult<()> {
        let stitch = self.stitch_for(Subsystem::FileSave)?;
        if config.frame_size.is_empty() || config.file_duration_secs == 0 {
            return Err(self.open_failed(TaskError::InvalidConfig(format!(
                "invalid recording {} / {} s segments",
                config.frame_size, config.file_duration_secs
            ))));
        }

        let has_audio = self.state(Subsystem::AudioDevice).is_open();
        let mut writer = SegmentedWriter::new(
            self.devices.file_writer(),
            SegmentPlan::new(&config.dir, &config.file_prefix, config.file_duration_secs),
            WriterConfig::record(config, stitch.frame_rate, has_audio),
        );
        let first = match writer.begin() {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                self.pipeline.events.log("Could not write local file");
                return Err(self.open_failed(TaskError::device_open(Subsystem::FileSave, e)));
            }
        };
        self.pipeline.events.send(TaskEvent::Log {
            message: format!("Begin write local file {first}"),
        });

        let queue: Arc<TimestampQueue<Frame>> = Arc::new(TimestampQueue::new(
            SINK_QUEUE_CAPACITY,
            OverflowPolicy::ForceWait,
        ));
        let mut group = StageGroup::new(Subsystem::FileSave);
        self.pipeline.finish.watch(&queue);
        group.watch(queue.clone());

        let stage = FileSaveStage {
            writer,
            queue: Arc::clone(&queue),
            frame_size: config.frame_size,
            token: group.token(&self.pipeline.finish),
            pipeline: Arc::clone(&self.pipeline),
        };
        if let Err(e) = group.spawn("file-save", move || stage.run()) {
            group.shutdown();
            return Err(self.open_failed(e));
        }

        *self.pipeline.save.write() = Some(queue);
        self.opened(Subsystem::FileSave, group);
        Ok(())
    }

    /// Stop writing segment files.
    pub fn stop_save_to_disk(&mut self) {
        *self.pipeline.save.write() = None;
        if self.close(Subsystem::FileSave) {
            self.pipeline.events.log("File save stopped");
        }
    }

    // ----------------------------------------------------------------
    // Previews
    // ----------------------------------------------------------------

    /// Deliver synchronized frame-sets to `callback` at the capture rate.
    pub fn begin_show_video_source_frames(&mut self, callback: SourceFramesCallback) -> TaskResult<()> {
        self.check_can_open(Subsystem::SourcePreview, Some(Subsystem::VideoDevices))?;
        let fps = self.video.map(|v| v.frame_rate).unwrap_or(0);

        let mut group = StageGroup::new(Subsystem::SourcePreview);
        let stage = PreviewStage {
            name: "sources",
            queue: Arc::clone(&self.pipeline.synced_show),
            callback,
            wait: preview_wait(fps),
            token: group.token(&self.pipeline.finish),
        };
        group.spawn("preview-sources", move || stage.run())?;
        self.opened(Subsystem::SourcePreview, group);
        Ok(())
    }

    /// Stop the source-frames preview.
    pub fn stop_show_video_source_frames(&mut self) {
        self.close(Subsystem::SourcePreview);
    }

    /// Deliver stitched panoramas to `callback` at the stitch rate.
    pub fn begin_show_stitched_frame(&mut self, callback: StitchedFrameCallback) -> TaskResult<()> {
        self.check_can_open(Subsystem::StitchedPreview, Some(Subsystem::Stitch))?;
        let fps = self.stitch.map(|s| s.frame_rate).unwrap_or(0);

        let mut group = StageGroup::new(Subsystem::StitchedPreview);
        let stage = PreviewStage {
            name: "stitched",
            queue: Arc::clone(&self.pipeline.stitched_show),
            callback,
            wait: preview_wait(fps),
            token: group.token(&self.pipeline.finish),
        };
        group.spawn("preview-stitched", move || stage.run())?;
        self.opened(Subsystem::StitchedPreview, group);
        Ok(())
    }

    /// Stop the stitched-frame preview.
    pub fn stop_show_stitched_frame(&mut self) {
        self.close(Subsystem::StitchedPreview);
    }

    // ----------------------------------------------------------------
    // Frame access
    // ----------------------------------------------------------------

    /// Most recent synchronized frame-set; `None` once finished.
    pub fn get_latest_video_source_frames(&self) -> Option<FrameSet> {
        if self.has_finished() {
            return None;
        }
        self.pipeline.latest_sources.get()
    }

    /// Most recent stitched panorama; `None` once finished.
    pub fn get_latest_stitched_frame(&self) -> Option<Frame> {
        if self.has_finished() {
            return None;
        }
        self.pipeline.latest_stitched.get()
    }

    /// Take the next frame-set from the preview queue.
    pub fn get_video_source_frames(&self, timeout: Duration) -> Option<FrameSet> {
        self.pipeline.synced_show.pull_timeout(timeout)
    }

    /// Take the next panorama from the preview queue.
    pub fn get_stitched_video_frame(&self, timeout: Duration) -> Option<Frame> {
        self.pipeline.stitched_show.pull_timeout(timeout)
    }

    // ----------------------------------------------------------------
    // Status
    // ----------------------------------------------------------------

    /// Whether the global finish flag is raised.
    pub fn has_finished(&self) -> bool {
        self.pipeline.has_finished()
    }

    pub fn finish_reason(&self) -> Option<StopReason> {
        self.pipeline.finish.reason()
    }

    /// Raise the finish flag; every stage winds down on its own.
    pub fn request_finish(&self) {
        self.pipeline.fail(StopReason::UserRequested);
    }

    pub fn state(&self, subsystem: Subsystem) -> SubsystemState {
        self.states.get(&subsystem).copied().unwrap_or_default()
    }

    /// Every subsystem's state, in teardown order.
    pub fn subsystem_states(&self) -> Vec<(Subsystem, SubsystemState)> {
        Subsystem::ALL
            .iter()
            .map(|&subsystem| (subsystem, self.state(subsystem)))
            .collect()
    }

    pub fn any_open(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Current counters.
    pub fn metrics(&self) -> TaskMetrics {
        let mut drops = self.pipeline.shared_drops();
        drops += self.sources.iter().map(|q| q.dropped()).sum::<u64>();
        if let Some(stitched) = &self.stitched {
            drops += stitched.dropped();
        }
        self.pipeline.metrics.snapshot(drops)
    }

    /// Mark that metrics have been reported (for rate calculation).
    pub fn mark_metrics_reported(&self) {
        self.pipeline.metrics.mark_reported();
    }

    // ----------------------------------------------------------------
    // Teardown
    // ----------------------------------------------------------------

    /// Close every subsystem in teardown order. Never-opened subsystems are skipped.
    #[instrument(name = "close_all", skip(self))]
    pub fn close_all(&mut self) {
        for subsystem in Subsystem::ALL {
            match subsystem {
                Subsystem::VideoDevices => self.close_video_devices(),
                Subsystem::AudioDevice => self.close_audio_device(),
                Subsystem::Stitch => self.stop_video_stitch(),
                Subsystem::LiveStream => self.close_live_stream(),
                Subsystem::FileSave => self.stop_save_to_disk(),
                Subsystem::SourcePreview => self.stop_show_video_source_frames(),
                Subsystem::StitchedPreview => self.stop_show_stitched_frame(),
            }
        }
    }

    /// Tear everything down and lower the finish flag.
    pub fn reset(&mut self) {
        self.close_all();
        self.pipeline.reset();
        self.states.clear();
        info!("Task reset");
    }

    // ----------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------

    fn check_can_open(&self, subsystem: Subsystem, requires: Option<Subsystem>) -> TaskResult<()> {
        if self.has_finished() {
            return Err(self.open_failed(TaskError::Finished));
        }
        if self.state(subsystem).is_open() {
            return Err(self.open_failed(TaskError::AlreadyOpen(subsystem)));
        }
        if let Some(requires) = requires {
            if !self.state(requires).is_open() {
                return Err(self.open_failed(TaskError::NotReady {
                    subsystem,
                    requires,
                }));
            }
        }
        Ok(())
    }

    fn stitch_for(&self, subsystem: Subsystem) -> TaskResult<StitchFormat> {
        self.check_can_open(subsystem, Some(Subsystem::Stitch))?;
        self.stitch.ok_or(TaskError::NotReady {
            subsystem,
            requires: Subsystem::Stitch,
        })
    }

    fn open_failed(&self, err: TaskError) -> TaskError {
        warn!("{}", err);
        self.pipeline.events.send(TaskEvent::Log {
            message: err.to_string(),
        });
        err
    }

    fn opened(&mut self, subsystem: Subsystem, group: StageGroup) {
        info!(
            subsystem = subsystem.name(),
            threads = group.thread_count(),
            "Subsystem open"
        );
        self.groups.insert(subsystem, group);
        self.transition(subsystem, SubsystemState::Open);
    }

    /// Returns true if the subsystem was open.
    fn close(&mut self, subsystem: Subsystem) -> bool {
        let Some(group) = self.groups.remove(&subsystem) else {
            return false;
        };
        group.shutdown();
        self.transition(subsystem, SubsystemState::Stopped);
        true
    }

    fn transition(&mut self, subsystem: Subsystem, state: SubsystemState) {
        self.states.insert(subsystem, state);
        self.pipeline
            .events
            .send(TaskEvent::SubsystemChanged { subsystem, state });
    }
}

impl Drop for PanoramaTask {
    fn drop(&mut self) {
        self.close_all();
    }
}
