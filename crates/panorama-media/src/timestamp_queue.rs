//! Bounded queue ordered by timestamp.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::Timestamped;
use crate::queue::{OverflowPolicy, Stoppable};

struct TsState<T> {
    items: VecDeque<T>,
    stopped: bool,
    dropped: u64,
}

/// A bounded queue whose entries are kept sorted by timestamp.
///
/// Used where producers with independent clocks feed one consumer, such as
/// audio and video frames merged into a sink: the consumer always receives
/// the entry with the smallest timestamp, and drop-oldest eviction removes
/// that same entry. Entries with equal timestamps keep their push order.
pub struct TimestampQueue<T> {
    state: Mutex<TsState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T: Timestamped> TimestampQueue<T> {
    /// Create a queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(TsState {
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

    /// Insert by timestamp.
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

        let ts = item.timestamp_us();
        let pos = state
            .items
            .partition_point(|queued| queued.timestamp_us() <= ts);
        state.items.insert(pos, item);
        self.not_empty.notify_one();
        true
    }

    /// Block until an entry is available and return the oldest.
    ///
    /// Returns `None` once stopped and empty.
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
                return None;
            }
        }
    }

    /// Stop the queue and wake every blocked caller.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drop every queued entry.
    pub fn clear(&self) {
        self.state.lock().items.clear();
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

    /// Entries evicted so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl<T: Timestamped + Send> Stoppable for TimestampQueue<T> {
    fn stop(&self) {
        TimestampQueue::stop(self);
    }
}
