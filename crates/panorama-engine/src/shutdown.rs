//! Shared cancellation for every pipeline stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use panorama_ipc::StopReason;
use panorama_media::Stoppable;

/// The global finish flag.
///
/// Raised once by the first fatal error (or an explicit request). Raising it
/// stops every watched queue so that no stage stays blocked on a producer
/// that will never deliver again. Only [`reset`](Self::reset) lowers it.
#[derive(Default)]
pub struct FinishFlag {
    finished: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    watched: Mutex<Vec<Weak<dyn Stoppable>>>,
}

impl FinishFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop `queue` when the flag is raised. Stops it immediately if the
    /// flag is already up.
    pub fn watch<Q: Stoppable + 'static>(&self, queue: &Arc<Q>) {
        let mut watched = self.watched.lock();
        if self.is_finished() {
            queue.stop();
            return;
        }
        let weak = Arc::downgrade(queue);
        let weak: Weak<dyn Stoppable> = weak;
        watched.retain(|w| w.strong_count() > 0);
        watched.push(weak);
    }

    /// Raise the flag. Returns true if this call raised it; later reasons
    /// are ignored.
    pub fn finish(&self, reason: StopReason) -> bool {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            self.finished.store(true, Ordering::SeqCst);
        }

        let queues: Vec<_> = self
            .watched
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for queue in queues {
            queue.stop();
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Why the flag was raised.
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.lock().clone()
    }

    /// Lower the flag and forget every watched queue.
    pub fn reset(&self) {
        let mut current = self.reason.lock();
        *current = None;
        self.finished.store(false, Ordering::SeqCst);
        self.watched.lock().clear();
    }
}

/// Exit condition handed to one stage thread: the global flag plus the
/// end flag of the subsystem that owns the thread.
#[derive(Clone)]
pub(crate) struct StageToken {
    finish: Arc<FinishFlag>,
    end: Arc<AtomicBool>,
}

impl StageToken {
    pub fn new(finish: Arc<FinishFlag>, end: Arc<AtomicBool>) -> Self {
        Self { finish, end }
    }

    pub fn should_exit(&self) -> bool {
        self.end.load(Ordering::SeqCst) || self.finish.is_finished()
    }
}
