//! Preview threads handing frames to caller callbacks.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use panorama_media::BoundedQueue;

use crate::shutdown::StageToken;

/// Hands frames from a preview queue to a caller-supplied callback.
pub(crate) struct PreviewStage<T> {
    pub name: &'static str,
    pub queue: Arc<BoundedQueue<T>>,
    pub callback: Box<dyn FnMut(&T) + Send>,
    pub wait: Duration,
    pub token: StageToken,
}

impl<T: Send + 'static> PreviewStage<T> {
    pub fn run(mut self) {
        info!(preview = self.name, wait_ms = self.wait.as_millis() as u64, "Preview thread started");
        let mut shown = 0u64;

        while !self.token.should_exit() {
            match self.queue.pull_timeout(self.wait) {
                Some(item) => {
                    (self.callback)(&item);
                    shown += 1;
                    thread::sleep(self.wait);
                }
                None if self.queue.is_stopped() => break,
                None => {}
            }
        }

        debug!(preview = self.name, shown, "Preview thread exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::stages::testing::Harness;

    #[test]
    fn test_callback_sees_every_item_until_stop() {
        let harness = Harness::new();
        let queue = Arc::new(BoundedQueue::drop_oldest(8));
        for i in 0..3u32 {
            queue.push(i);
        }
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let stage = PreviewStage {
            name: "test",
            queue: Arc::clone(&queue),
            callback: Box::new(move |item: &u32| {
                assert_eq!(*item as usize, counter.fetch_add(1, Ordering::SeqCst));
            }),
            wait: Duration::from_millis(1),
            token: harness.token(),
        };
        let handle = thread::spawn(move || stage.run());
        for _ in 0..2000 {
            if seen.load(Ordering::SeqCst) >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        queue.stop();
        handle.join().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exits_on_end_flag() {
        let harness = Harness::new();
        let stage = PreviewStage {
            name: "test",
            queue: Arc::new(BoundedQueue::<u32>::drop_oldest(1)),
            callback: Box::new(|_| {}),
            wait: Duration::from_millis(5),
            token: harness.token(),
        };
        let handle = thread::spawn(move || stage.run());
        harness.end();
        handle.join().unwrap();
    }
}
