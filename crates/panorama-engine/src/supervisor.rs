//! Ownership of stage threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use panorama_ipc::Subsystem;
use panorama_media::Stoppable;

use crate::shutdown::{FinishFlag, StageToken};
use crate::TaskResult;

/// The threads and queues belonging to one open subsystem.
///
/// Shutting the group down follows one order: raise the end flag, stop
/// every queue the threads may block on, then join each thread once.
pub(crate) struct StageGroup {
    subsystem: Subsystem,
    end: Arc<AtomicBool>,
    queues: Vec<Arc<dyn Stoppable>>,
    threads: Vec<JoinHandle<()>>,
}

impl StageGroup {
    pub fn new(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            end: Arc::new(AtomicBool::new(false)),
            queues: Vec::new(),
            threads: Vec::new(),
        }
    }

    pub fn token(&self, finish: &Arc<FinishFlag>) -> StageToken {
        StageToken::new(Arc::clone(finish), Arc::clone(&self.end))
    }

    /// Stop `queue` when this group shuts down.
    pub fn watch(&mut self, queue: Arc<dyn Stoppable>) {
        self.queues.push(queue);
    }

    /// Spawn a named stage thread owned by this group.
    pub fn spawn<F>(&mut self, name: impl Into<String>, f: F) -> TaskResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.into()).spawn(f)?;
        self.threads.push(handle);
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Signal, stop queues, join.
    pub fn shutdown(mut self) {
        self.end.store(true, Ordering::SeqCst);
        for queue in &self.queues {
            queue.stop();
        }
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                error!(subsystem = self.subsystem.name(), thread = %name, "Stage thread panicked");
            } else {
                debug!(subsystem = self.subsystem.name(), thread = %name, "Stage thread joined");
            }
        }
    }
}
