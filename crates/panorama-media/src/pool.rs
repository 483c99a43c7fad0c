//! Recycling pool for fixed-size frame buffers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Hands out zeroed buffers of one size, reusing those whose frames have
/// all been dropped.
///
/// A buffer frozen into a [`Frame`](crate::Frame) is given back with
/// [`recycle`](Self::recycle) while the frame is still in flight. The pool
/// keeps a handle to it; once every other handle is gone the handle is the
/// sole owner and [`acquire`](Self::acquire) takes the allocation back.
pub struct FramePool {
    buffer_size: usize,
    capacity: usize,
    tracked: Mutex<VecDeque<Bytes>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl FramePool {
    /// Create a pool of `buffer_size` buffers tracking at most `capacity`
    /// frozen buffers.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            buffer_size,
            capacity: capacity.max(1),
            tracked: Mutex::new(VecDeque::with_capacity(capacity)),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Size of every buffer handed out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// A zeroed buffer, reclaimed if one is free.
    pub fn acquire(&self) -> BytesMut {
        if let Some(mut buf) = self.reclaim() {
            buf.fill(0);
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::zeroed(self.buffer_size)
    }

    /// Track a frozen buffer so it can be reclaimed after its frames drop.
    ///
    /// Buffers of the wrong size, and buffers beyond capacity, are left to
    /// be freed normally.
    pub fn recycle(&self, buf: &Bytes) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut tracked = self.tracked.lock();
        if tracked.len() < self.capacity {
            tracked.push_back(buf.clone());
        }
    }

    fn reclaim(&self) -> Option<BytesMut> {
        let mut tracked = self.tracked.lock();
        for _ in 0..tracked.len() {
            let buf = tracked.pop_front()?;
            match buf.try_into_mut() {
                Ok(buf) => return Some(buf),
                Err(buf) => tracked.push_back(buf),
            }
        }
        None
    }

    /// Buffers freshly allocated so far.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers handed out again so far.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Buffers currently tracked, in use or free.
    pub fn tracked(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Forget every tracked buffer.
    pub fn clear(&self) {
        self.tracked.lock().clear();
    }
}
