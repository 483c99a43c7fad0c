//! Frame-rate measurement.

use std::time::{Duration, Instant};

/// Measures throughput of a stage in frames per second.
///
/// The first `warmup` frames are ignored; afterwards a rate is produced
/// every `window` frames, measured over the wall time of that window.
#[derive(Debug, Clone)]
pub struct FrameRateEstimator {
    target_fps: f64,
    warmup_frames: u64,
    window_frames: u64,
    count: u64,
    window_count: u64,
    window_start: Option<Instant>,
}

impl FrameRateEstimator {
    /// Estimator that reports every `target_fps` frames after `warmup`.
    pub fn new(target_fps: u32, warmup: Duration) -> Self {
        let fps = target_fps.max(1) as u64;
        Self {
            target_fps: target_fps as f64,
            warmup_frames: (fps as f64 * warmup.as_secs_f64()).round() as u64,
            window_frames: fps,
            count: 0,
            window_count: 0,
            window_start: None,
        }
    }

    /// Record one frame now.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Record one frame at `now`; returns a measurement when a window closes.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        if self.count <= self.warmup_frames {
            return None;
        }

        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.window_count = 0;
            return None;
        };

        self.window_count += 1;
        if self.window_count < self.window_frames {
            return None;
        }

        let elapsed = now.duration_since(start).as_secs_f64();
        let frames = self.window_count;
        self.window_start = Some(now);
        self.window_count = 0;

        if elapsed > 0.0 {
            Some(frames as f64 / elapsed)
        } else {
            None
        }
    }

    /// Whether a measurement is further than `tolerance` fps from the target.
    pub fn deviates(&self, measured: f64, tolerance: f64) -> bool {
        (measured - self.target_fps).abs() > tolerance
    }

    /// Frames recorded so far.
    pub fn frames(&self) -> u64 {
        self.count
    }
}
