//! Fire-and-forget event delivery.

use crossbeam_channel::Sender;
use tracing::{info, warn};

use panorama_ipc::TaskEvent;

/// Sends [`TaskEvent`]s to the front-end without ever blocking a stage.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<Sender<TaskEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<Sender<TaskEvent>>) -> Self {
        Self { tx }
    }

    /// Send an event to the front-end.
    pub fn send(&self, event: TaskEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }

    /// Status line for the front-end, mirrored to the log.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(TaskEvent::Log { message });
    }
}
