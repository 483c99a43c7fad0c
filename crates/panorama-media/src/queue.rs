//! Bounded, stoppable FIFO queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Something that can wake every thread blocked on it.
pub trait Stoppable: Send + Sync {
    /// Stop the queue; blocked callers return immediately.
    fn stop(&self);
}

/// What `push` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest entry; the producer never blocks.
    DropOldest,

    /// Block the producer until space frees up or the queue stops.
    ForceWait,
}

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
    dropped: u64,
}

/// A capacity-limited queue shared between threads.
///
/// No operation returns an error: every condition is expressed as a
/// `bool` or an `Option` so the queue can sit on hot paths.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    /// Create a drop-oldest queue.
    pub fn drop_oldest(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::DropOldest)
    }

    /// Create a force-wait queue.
    pub fn force_wait(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::ForceWait)
    }

    /// Insert at the tail.
    ///
    /// Returns false if the queue is (or becomes, while waiting) stopped.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }

        if state.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    state.items.pop_front();
                    state.dropped += 1;
                }
                OverflowPolicy::ForceWait => {
                    while state.items.len() >= self.capacity && !state.stopped {
                        self.not_full.wait(&mut state);
                    }
                    if state.stopped {
                        return false;
                    }
                }
            }
        }

        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Block until an entry is available, then return the oldest.
    ///
    /// Returns `None` once the queue is stopped and empty.
    pub fn pull(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pull`](Self::pull), giving up after `timeout`.
    pub fn pull_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                let item = state.items.pop_front();
                if item.is_some() {
                    self.not_full.notify_one();
                }
                return item;
            }
        }
    }

    /// Return the oldest entry without blocking.
    pub fn try_pull(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Stop the queue and wake every blocked producer and consumer.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Clear entries and accept pushes again after a stop.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.stopped = false;
        self.not_full.notify_all();
    }

    /// Drop every queued entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        self.not_full.notify_all();
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Returns true once stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Entries evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl<T: Send> Stoppable for BoundedQueue<T> {
    fn stop(&self) {
        BoundedQueue::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let queue = BoundedQueue::drop_oldest(3);
        for i in 0..10 {
            assert!(queue.push(i));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 7);
        assert_eq!(queue.try_pull(), Some(7));
        assert_eq!(queue.try_pull(), Some(8));
        assert_eq!(queue.try_pull(), Some(9));
        assert_eq!(queue.try_pull(), None);
    }

    #[test]
    fn test_drop_oldest_every_length() {
        for capacity in 1usize..6 {
            for pushes in 0usize..12 {
                let queue = BoundedQueue::drop_oldest(capacity);
                for i in 0..pushes {
                    queue.push(i);
                }
                let kept: Vec<_> = std::iter::from_fn(|| queue.try_pull()).collect();
                let expected: Vec<_> = (pushes.saturating_sub(capacity)..pushes).collect();
                assert_eq!(kept, expected, "capacity {capacity}, pushes {pushes}");
            }
        }
    }

    #[test]
    fn test_stop_wakes_all_pullers() {
        let queue = Arc::new(BoundedQueue::<u32>::drop_oldest(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pull())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.stop();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_pull_drains_after_stop() {
        let queue = BoundedQueue::drop_oldest(4);
        queue.push(1);
        queue.stop();

        assert!(!queue.push(2));
        assert_eq!(queue.pull(), Some(1));
        assert_eq!(queue.pull(), None);
    }

    #[test]
    fn test_force_wait_blocks_producer() {
        let queue = Arc::new(BoundedQueue::force_wait(2));
        queue.push(1);
        queue.push(2);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(3))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pull(), Some(1));

        assert!(producer.join().unwrap());
        assert_eq!(queue.pull(), Some(2));
        assert_eq!(queue.pull(), Some(3));
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_force_wait_stop_releases_producer() {
        let queue = Arc::new(BoundedQueue::force_wait(1));
        queue.push(1);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_pull_timeout_and_restart() {
        let queue = BoundedQueue::<u8>::drop_oldest(2);
        assert_eq!(queue.pull_timeout(Duration::from_millis(10)), None);

        queue.stop();
        assert!(queue.is_stopped());
        queue.restart();
        assert!(!queue.is_stopped());
        assert!(queue.push(5));
        assert_eq!(queue.pull_timeout(Duration::from_millis(10)), Some(5));
    }
}
