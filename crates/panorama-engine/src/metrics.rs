//! Pipeline counters and periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use panorama_ipc::TaskMetrics;

/// Counts frames as they move through the pipeline.
///
/// Every stage records into the same collector through relaxed atomics;
/// a snapshot derives the composite rate since the previous report.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    frames_captured: AtomicU64,
    frame_sets_synced: AtomicU64,
    frames_stitched: AtomicU64,
    frames_sent: AtomicU64,
    frames_saved: AtomicU64,
    audio_frames: AtomicU64,
    resyncs: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_stitched: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            frames_captured: AtomicU64::new(0),
            frame_sets_synced: AtomicU64::new(0),
            frames_stitched: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_saved: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_stitched: AtomicU64::new(0),
        }
    }

    /// Start the uptime clock if it is not running.
    pub fn start(&self) {
        let mut start = self.start_time.write();
        if start.is_none() {
            *start = Some(Instant::now());
            *self.last_report_time.write() = Instant::now();
        }
    }

    /// Zero every counter and stop the uptime clock.
    pub fn reset(&self) {
        *self.start_time.write() = None;
        for counter in [
            &self.frames_captured,
            &self.frame_sets_synced,
            &self.frames_stitched,
            &self.frames_sent,
            &self.frames_saved,
            &self.audio_frames,
            &self.resyncs,
            &self.last_stitched,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_report_time.write() = Instant::now();
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synced(&self) {
        self.frame_sets_synced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stitched(&self) {
        self.frames_stitched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved(&self) {
        self.frames_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot. `queue_drops` is summed by the caller,
    /// which owns the queues.
    pub fn snapshot(&self, queue_drops: u64) -> TaskMetrics {
        let now = Instant::now();

        let last_time = *self.last_report_time.read();
        let elapsed = now.duration_since(last_time).as_secs_f32();
        let stitched = self.frames_stitched.load(Ordering::Relaxed);
        let last_stitched = self.last_stitched.load(Ordering::Relaxed);

        let stitch_fps = if elapsed > 0.0 {
            stitched.saturating_sub(last_stitched) as f32 / elapsed
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        TaskMetrics {
            stitch_fps,
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frame_sets_synced: self.frame_sets_synced.load(Ordering::Relaxed),
            frames_stitched: stitched,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_saved: self.frames_saved.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            queue_drops,
            resyncs: self.resyncs.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }

    /// Mark that metrics have been reported (for rate calculation).
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_stitched.store(
            self.frames_stitched.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        debug!("Metrics reported");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::new();
        metrics.start();
        for _ in 0..3 {
            metrics.record_captured();
        }
        metrics.record_synced();
        metrics.record_sent();
        metrics.record_audio();
        metrics.record_resync();

        let snapshot = metrics.snapshot(7);
        assert_eq!(snapshot.frames_captured, 3);
        assert_eq!(snapshot.frame_sets_synced, 1);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.frames_saved, 0);
        assert_eq!(snapshot.audio_frames, 1);
        assert_eq!(snapshot.resyncs, 1);
        assert_eq!(snapshot.queue_drops, 7);
    }

    #[test]
    fn test_stitch_rate_since_last_report() {
        let metrics = MetricsCollector::new();
        metrics.start();
        metrics.mark_reported();
        for _ in 0..10 {
            metrics.record_stitched();
        }
        thread::sleep(Duration::from_millis(50));

        let snapshot = metrics.snapshot(0);
        assert!(snapshot.stitch_fps > 0.0);
        assert_eq!(snapshot.frames_stitched, 10);

        metrics.mark_reported();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(metrics.snapshot(0).stitch_fps, 0.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = MetricsCollector::new();
        metrics.start();
        metrics.record_stitched();
        metrics.record_resync();
        metrics.reset();

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.frames_stitched, 0);
        assert_eq!(snapshot.resyncs, 0);
        assert_eq!(snapshot.uptime_seconds, 0);
    }
}
