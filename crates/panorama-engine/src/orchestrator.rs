//! Command loop driving a [`PanoramaTask`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use panorama_ipc::{TaskCommand, TaskEvent};

use crate::devices::DeviceFactory;
use crate::task::PanoramaTask;
use crate::TaskResult;

const COMMAND_POLL: Duration = Duration::from_millis(100);
const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Runs a panorama task from a command channel.
pub struct Engine {
    command_rx: Receiver<TaskCommand>,
    event_tx: Sender<TaskEvent>,
    task: PanoramaTask,
    last_metrics: Instant,
    finish_reported: bool,
}

impl Engine {
    /// Create a new engine.
    pub fn new(command_rx: Receiver<TaskCommand>, event_tx: Sender<TaskEvent>) -> Self {
        let task = PanoramaTask::new(Some(event_tx.clone()));
        Self::with_task(command_rx, event_tx, task)
    }

    /// Engine whose task opens devices through `devices`.
    pub fn with_devices(
        command_rx: Receiver<TaskCommand>,
        event_tx: Sender<TaskEvent>,
        devices: Arc<dyn DeviceFactory>,
    ) -> Self {
        let task = PanoramaTask::with_devices(devices, Some(event_tx.clone()));
        Self::with_task(command_rx, event_tx, task)
    }

    fn with_task(
        command_rx: Receiver<TaskCommand>,
        event_tx: Sender<TaskEvent>,
        task: PanoramaTask,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            task,
            last_metrics: Instant::now(),
            finish_reported: false,
        }
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(TaskEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(COMMAND_POLL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.task.close_all();
                    break;
                }
            }
            self.poll();
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: TaskCommand) -> bool {
        debug!(?command, "Handling command");

        let result = match command {
            TaskCommand::OpenVideoDevices(config) => self.task.open_video_devices(&config),
            TaskCommand::CloseVideoDevices => {
                self.task.close_video_devices();
                Ok(())
            }
            TaskCommand::OpenAudioDevice(config) => self.task.open_audio_device(&config),
            TaskCommand::CloseAudioDevice => {
                self.task.close_audio_device();
                Ok(())
            }
            TaskCommand::BeginVideoStitch(config) => self.task.begin_video_stitch(&config),
            TaskCommand::StopVideoStitch => {
                self.task.stop_video_stitch();
                Ok(())
            }
            TaskCommand::OpenLiveStream(config) => self.task.open_live_stream(&config),
            TaskCommand::CloseLiveStream => {
                self.task.close_live_stream();
                Ok(())
            }
            TaskCommand::BeginSaveToDisk(config) => self.task.begin_save_to_disk(&config),
            TaskCommand::StopSaveToDisk => {
                self.task.stop_save_to_disk();
                Ok(())
            }
            TaskCommand::GetStatus => {
                self.send_status();
                Ok(())
            }
            TaskCommand::Shutdown => {
                self.task.close_all();
                self.send_event(TaskEvent::Shutdown);
                return false;
            }
        };
        self.report(result);

        true
    }

    /// Open errors are already logged and forwarded by the task.
    fn report(&self, result: TaskResult<()>) {
        if let Err(e) = result {
            debug!(error = %e, "Command rejected");
        }
    }

    /// Periodic work between commands.
    fn poll(&mut self) {
        if self.task.has_finished() {
            if !self.finish_reported {
                self.finish_reported = true;
                if let Some(reason) = self.task.finish_reason() {
                    warn!(reason = %reason.message(), "Task finished");
                    self.send_event(TaskEvent::Finished { reason });
                }
                self.task.close_all();
            }
            return;
        }
        self.finish_reported = false;

        if self.task.any_open() && self.last_metrics.elapsed() >= METRICS_INTERVAL {
            self.emit_metrics();
        }
    }

    fn emit_metrics(&mut self) {
        self.send_event(TaskEvent::Metrics(self.task.metrics()));
        self.task.mark_metrics_reported();
        self.last_metrics = Instant::now();
    }

    fn send_status(&self) {
        self.send_event(TaskEvent::Status {
            subsystems: self.task.subsystem_states(),
            finished: self.task.has_finished(),
        });
    }

    fn send_event(&self, event: TaskEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panorama_ipc::{
        command_channel, event_channel, FrameSize, StitchConfig, StopReason, Subsystem,
        SubsystemState, VideoSourceConfig,
    };
    use std::thread;

    fn collect_until(rx: &Receiver<TaskEvent>, done: impl Fn(&TaskEvent) -> bool) -> Vec<TaskEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
                let stop = done(&event);
                events.push(event);
                if stop {
                    break;
                }
            }
        }
        events
    }

    #[test]
    fn test_ready_status_and_shutdown() {
        let (cmd_tx, cmd_rx) = command_channel();
        let (evt_tx, evt_rx) = event_channel();
        let handle = thread::spawn(move || Engine::new(cmd_rx, evt_tx).run());

        cmd_tx.send(TaskCommand::GetStatus).unwrap();
        cmd_tx.send(TaskCommand::Shutdown).unwrap();
        let events = collect_until(&evt_rx, |e| matches!(e, TaskEvent::Shutdown));
        handle.join().unwrap();

        assert!(matches!(events[0], TaskEvent::Ready));
        let status = events.iter().find_map(|e| match e {
            TaskEvent::Status { subsystems, finished } => Some((subsystems.clone(), *finished)),
            _ => None,
        });
        let (subsystems, finished) = status.unwrap();
        assert!(!finished);
        assert_eq!(subsystems.len(), Subsystem::ALL.len());
        assert!(matches!(events.last(), Some(TaskEvent::Shutdown)));
    }

    #[test]
    fn test_source_failure_reports_finished_and_closes() {
        let (cmd_tx, cmd_rx) = command_channel();
        let (evt_tx, evt_rx) = event_channel();
        let handle = thread::spawn(move || Engine::new(cmd_rx, evt_tx).run());

        cmd_tx
            .send(TaskCommand::OpenVideoDevices(VideoSourceConfig {
                devices: vec![
                    "test://pattern".into(),
                    "test://pattern?fail_at=40".into(),
                ],
                frame_size: FrameSize::new(32, 16),
                frame_rate: 30,
                ..Default::default()
            }))
            .unwrap();
        cmd_tx
            .send(TaskCommand::BeginVideoStitch(StitchConfig {
                frame_size: FrameSize::new(64, 16),
                ..Default::default()
            }))
            .unwrap();

        let events = collect_until(&evt_rx, |e| matches!(e, TaskEvent::Finished { .. }));
        let reason = events.iter().find_map(|e| match e {
            TaskEvent::Finished { reason } => Some(reason.clone()),
            _ => None,
        });
        assert!(matches!(
            reason,
            Some(StopReason::SourceReadFailed { index: 1, .. })
        ));

        cmd_tx.send(TaskCommand::Shutdown).unwrap();
        let rest = collect_until(&evt_rx, |e| matches!(e, TaskEvent::Shutdown));
        handle.join().unwrap();

        let stopped: Vec<Subsystem> = events
            .iter()
            .chain(rest.iter())
            .filter_map(|e| match e {
                TaskEvent::SubsystemChanged {
                    subsystem,
                    state: SubsystemState::Stopped,
                } => Some(*subsystem),
                _ => None,
            })
            .collect();
        assert_eq!(stopped, vec![Subsystem::VideoDevices, Subsystem::Stitch]);
    }
}
