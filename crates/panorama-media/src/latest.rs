//! Latest-value cache for poll-based readers.

use parking_lot::Mutex;

/// Holds the most recently published value.
///
/// The lock is only held while a cheap handle is copied in or out, never
/// around I/O.
pub struct LatestValue<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> LatestValue<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replace the cached value.
    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    /// Copy out the cached value.
    pub fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    /// Forget the cached value.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl<T: Clone> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_overwrites() {
        let latest = LatestValue::new();
        assert_eq!(latest.get(), None);

        latest.set(1);
        latest.set(2);
        assert_eq!(latest.get(), Some(2));
        assert_eq!(latest.get(), Some(2));

        latest.clear();
        assert_eq!(latest.get(), None);
    }
}
