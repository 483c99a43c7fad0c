//! Wall-clock pacing for generated and replayed frames.

use std::thread;
use std::time::{Duration, Instant};

pub(crate) struct Pacer {
    start: Instant,
    enabled: bool,
}

impl Pacer {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            start: Instant::now(),
            enabled,
        }
    }

    /// Sleep until `offset` after the pacer was created.
    pub(crate) fn wait_until(&self, offset: Duration) {
        if !self.enabled {
            return;
        }
        let due = self.start + offset;
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}
