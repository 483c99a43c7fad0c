//! Timestamp alignment across independently paced sources.
//!
//! The [`Synchronizer`] turns N per-source FIFO queues into a stream of
//! frame-sets whose timestamps agree to within one frame interval:
//!
//! 1. Discard a warm-up window from every source.
//! 2. Align: pull one frame per source; the newest frame (lowest index on
//!    ties) is the reference, and every other source discards frames until
//!    one is strictly newer than it. At most `max_catchup` frames are
//!    discarded per source; past that the attempt is abandoned and retried.
//! 3. Steady state: pull one frame per source per tick. A source lagging the
//!    newest frame by more than one interval gives up one extra frame, which
//!    absorbs small rate differences.
//! 4. Every `check_every` ticks, if any frame-set since the last check
//!    spread wider than the tolerance, drop the alignment and go back to 2.

use std::sync::Arc;

use panorama_ipc::SyncConfig;
use panorama_media::{BoundedQueue, Frame, FrameSet, Timestamped};

/// Derived synchronization limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParams {
    pub warmup_frames: u32,
    pub frame_interval_us: i64,
    pub max_spread_us: i64,
    pub check_every: u64,
    pub max_catchup: u32,
}

impl SyncParams {
    pub fn new(frame_rate: u32, config: &SyncConfig) -> Self {
        let fps = frame_rate.max(1);
        let interval = 1_000_000.0 / fps as f64;
        Self {
            warmup_frames: config.warmup_frames,
            frame_interval_us: interval.round() as i64,
            max_spread_us: (interval * config.drift_tolerance + 0.5) as i64,
            check_every: (fps as u64 * config.check_interval_secs as u64).max(1),
            max_catchup: config.max_catchup_frames.unwrap_or(fps * 2).max(1),
        }
    }
}

/// Something the synchronizer did that the stage reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// Sources aligned to `reference` after discarding `discarded` frames.
    Aligned { reference: usize, discarded: u32 },

    /// Source `index` discarded `discarded` frames without catching up.
    CatchUpExceeded { index: usize, discarded: u32 },

    /// Spread of the set at a check boundary exceeded the tolerance.
    Drift { spread_us: i64 },
}

/// Why the synchronizer cannot produce another frame-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHalt {
    /// A source queue was stopped and drained.
    Stopped,

    /// A source delivered the end-of-stream sentinel.
    SourceEnded { index: usize },
}

enum Alignment {
    Aligned {
        set: FrameSet,
        reference: usize,
        discarded: u32,
    },
    Exceeded {
        index: usize,
        discarded: u32,
    },
}

/// Aligns frames pulled from per-source queues.
pub struct Synchronizer {
    sources: Vec<Arc<BoundedQueue<Frame>>>,
    params: SyncParams,
    warmed_up: bool,
    aligned: bool,
    ticks: u64,
}

impl Synchronizer {
    pub fn new(sources: Vec<Arc<BoundedQueue<Frame>>>, params: SyncParams) -> Self {
        Self {
            sources,
            params,
            warmed_up: false,
            aligned: false,
            ticks: 0,
        }
    }

    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Block until the next aligned frame-set is available.
    pub fn next_set<F>(&mut self, mut notify: F) -> Result<FrameSet, SyncHalt>
    where
        F: FnMut(SyncNotice),
    {
        if !self.warmed_up {
            for _ in 0..self.params.warmup_frames {
                self.pull_all()?;
            }
            self.warmed_up = true;
        }

        loop {
            if !self.aligned {
                match self.align()? {
                    Alignment::Aligned {
                        set,
                        reference,
                        discarded,
                    } => {
                        self.aligned = true;
                        self.ticks = 0;
                        notify(SyncNotice::Aligned {
                            reference,
                            discarded,
                        });
                        return Ok(set);
                    }
                    Alignment::Exceeded { index, discarded } => {
                        notify(SyncNotice::CatchUpExceeded { index, discarded });
                        continue;
                    }
                }
            }

            let set = self.tick()?;
            self.ticks += 1;

            // Only the set at the boundary is judged; a spike in between
            // that the per-tick correction absorbed does not realign.
            if self.ticks % self.params.check_every == 0 {
                let spread_us = set.spread_us();
                if spread_us > self.params.max_spread_us {
                    self.aligned = false;
                    notify(SyncNotice::Drift { spread_us });
                    continue;
                }
            }
            return Ok(set);
        }
    }

    fn pull(&self, index: usize) -> Result<Frame, SyncHalt> {
        match self.sources[index].pull() {
            None => Err(SyncHalt::Stopped),
            Some(frame) if frame.is_end_of_stream() => Err(SyncHalt::SourceEnded { index }),
            Some(frame) => Ok(frame),
        }
    }

    fn pull_all(&self) -> Result<Vec<Frame>, SyncHalt> {
        (0..self.sources.len()).map(|i| self.pull(i)).collect()
    }

    fn align(&self) -> Result<Alignment, SyncHalt> {
        let mut frames = self.pull_all()?;
        let (reference, reference_ts) = newest(&frames);

        let mut discarded = 0;
        for index in 0..frames.len() {
            if index == reference {
                continue;
            }
            let mut dropped = 0;
            while frames[index].timestamp_us() <= reference_ts {
                if dropped >= self.params.max_catchup {
                    return Ok(Alignment::Exceeded {
                        index,
                        discarded: dropped,
                    });
                }
                frames[index] = self.pull(index)?;
                dropped += 1;
            }
            discarded += dropped;
        }

        Ok(Alignment::Aligned {
            set: FrameSet::new(frames),
            reference,
            discarded,
        })
    }

    fn tick(&self) -> Result<FrameSet, SyncHalt> {
        let mut frames = self.pull_all()?;
        let (_, newest_ts) = newest(&frames);
        for (index, frame) in frames.iter_mut().enumerate() {
            if newest_ts - frame.timestamp_us() > self.params.frame_interval_us {
                *frame = self.pull(index)?;
            }
        }
        Ok(FrameSet::new(frames))
    }
}

/// Index and timestamp of the newest frame; the lowest index wins ties.
fn newest(frames: &[Frame]) -> (usize, i64) {
    frames
        .iter()
        .enumerate()
        .fold((0, i64::MIN), |(best, best_ts), (index, frame)| {
            let ts = frame.timestamp_us();
            if ts > best_ts {
                (index, ts)
            } else {
                (best, best_ts)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use panorama_ipc::FrameSize;
    use panorama_media::{PixelFormat, VideoInfo};

    const INTERVAL: f64 = 1_000_000.0 / 30.0;

    fn stamp(n: i64, scale: f64) -> i64 {
        (n as f64 * INTERVAL * scale).round() as i64
    }

    fn frame(ts: i64) -> Frame {
        let info = VideoInfo::new(PixelFormat::Bgr24, FrameSize::new(1, 1));
        Frame::video(info, ts, Bytes::from_static(&[0, 0, 0]))
    }

    /// Pre-filled, stopped queues: pulls drain then report `Stopped`.
    fn sources(timestamps: Vec<Vec<i64>>) -> Vec<Arc<BoundedQueue<Frame>>> {
        timestamps
            .into_iter()
            .map(|stamps| {
                let queue = Arc::new(BoundedQueue::drop_oldest(stamps.len() + 1));
                for ts in stamps {
                    queue.push(frame(ts));
                }
                queue.stop();
                queue
            })
            .collect()
    }

    fn config(warmup_frames: u32, check_interval_secs: u32) -> SyncConfig {
        SyncConfig {
            warmup_frames,
            check_interval_secs,
            ..SyncConfig::default()
        }
    }

    fn timestamps(set: &FrameSet) -> Vec<i64> {
        set.frames().iter().map(|f| f.timestamp_us()).collect()
    }

    #[test]
    fn test_params_from_config() {
        let params = SyncParams::new(30, &SyncConfig::default());
        assert_eq!(params.frame_interval_us, 33333);
        assert_eq!(params.max_spread_us, 36667);
        assert_eq!(params.check_every, 1800);
        assert_eq!(params.max_catchup, 60);
        assert_eq!(params.warmup_frames, 25);

        let params = SyncParams::new(0, &SyncConfig::default());
        assert_eq!(params.frame_interval_us, 1_000_000);
    }

    #[test]
    fn test_warmup_then_align_to_newest() {
        let queues = sources(vec![
            (0..50).map(|n| stamp(n, 1.0)).collect(),
            (0..50).map(|n| stamp(n, 1.0) + stamp(5, 1.0)).collect(),
            (0..50).map(|n| stamp(n, 1.0) + stamp(2, 1.0)).collect(),
        ]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(2, 60)));

        let mut notices = Vec::new();
        let set = sync.next_set(|n| notices.push(n)).unwrap();

        assert_eq!(
            notices,
            vec![SyncNotice::Aligned {
                reference: 1,
                discarded: 10
            }]
        );
        assert_eq!(timestamps(&set), vec![266667, 233334, 266667]);
        assert!(set.spread_us() <= sync.params().max_spread_us);
    }

    #[test]
    fn test_tie_goes_to_lowest_index() {
        let queues = sources(vec![
            (0..50).map(|n| stamp(n + 3, 1.0)).collect(),
            (0..50).map(|n| stamp(n, 1.0)).collect(),
            (0..50).map(|n| stamp(n + 3, 1.0)).collect(),
        ]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(0, 60)));

        let mut notices = Vec::new();
        let set = sync.next_set(|n| notices.push(n)).unwrap();

        assert!(matches!(notices[0], SyncNotice::Aligned { reference: 0, .. }));
        assert_eq!(timestamps(&set), vec![stamp(3, 1.0), stamp(4, 1.0), stamp(4, 1.0)]);
    }

    #[test]
    fn test_catch_up_is_bounded() {
        let queues = sources(vec![
            (0..100).map(|n| stamp(n, 1.0)).collect(),
            (0..100).map(|n| stamp(n + 10, 1.0)).collect(),
        ]);
        let config = SyncConfig {
            warmup_frames: 0,
            max_catchup_frames: Some(3),
            ..SyncConfig::default()
        };
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config));

        let mut notices = Vec::new();
        let set = sync.next_set(|n| notices.push(n)).unwrap();

        let exceeded = SyncNotice::CatchUpExceeded {
            index: 0,
            discarded: 3,
        };
        assert_eq!(
            notices,
            vec![
                exceeded.clone(),
                exceeded.clone(),
                exceeded,
                SyncNotice::Aligned {
                    reference: 1,
                    discarded: 2
                },
            ]
        );
        assert_eq!(timestamps(&set), vec![stamp(14, 1.0), stamp(13, 1.0)]);
    }

    #[test]
    fn test_rates_within_ten_percent_stay_aligned() {
        let queues = sources(
            [0.9, 1.0, 1.1]
                .iter()
                .map(|&scale| (0..3000).map(|n| stamp(n, scale)).collect())
                .collect(),
        );
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &SyncConfig::default()));

        let mut notices = Vec::new();
        for _ in 0..600 {
            let set = sync.next_set(|n| notices.push(n)).unwrap();
            assert!(set.spread_us() <= sync.params().frame_interval_us, "{:?}", timestamps(&set));
        }
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], SyncNotice::Aligned { .. }));
    }

    #[test]
    fn test_timestamp_jump_resyncs_within_one_check() {
        let queues = sources(vec![
            (0..1500).map(|n| stamp(n, 1.0)).collect(),
            (0..1500).map(|n| stamp(n, 1.0)).collect(),
            (0..1500)
                .map(|n| stamp(n, 1.0) + if n >= 100 { 1_000_000 } else { 0 })
                .collect(),
        ]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(25, 1)));
        let max_spread = sync.params().max_spread_us;
        let check_every = sync.params().check_every as usize;

        let mut drift_at = None;
        let mut first_wide = None;
        for index in 0..300 {
            let mut drifted = false;
            let set = sync
                .next_set(|n| drifted |= matches!(n, SyncNotice::Drift { .. }))
                .unwrap();
            if drifted && drift_at.is_none() {
                drift_at = Some(index);
            }
            if set.spread_us() > max_spread && first_wide.is_none() {
                first_wide = Some(index);
            }
            if drift_at.is_some() {
                assert!(set.spread_us() <= max_spread);
            }
        }

        let first_wide = first_wide.unwrap();
        let drift_at = drift_at.unwrap();
        assert!(drift_at > first_wide);
        assert!(drift_at - first_wide <= check_every);
    }

    #[test]
    fn test_momentary_spike_between_checks_ignored() {
        let queues = sources(vec![
            (0..400).map(|n| stamp(n, 1.0)).collect(),
            (0..400).map(|n| stamp(n, 1.0)).collect(),
            (0..400)
                .map(|n| stamp(n, 1.0) + if n == 70 { 1_000_000 } else { 0 })
                .collect(),
        ]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(25, 1)));
        let max_spread = sync.params().max_spread_us;

        let mut notices = Vec::new();
        let mut wide = 0;
        for _ in 0..200 {
            let set = sync.next_set(|n| notices.push(n)).unwrap();
            if set.spread_us() > max_spread {
                wide += 1;
            }
        }

        assert_eq!(wide, 1);
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], SyncNotice::Aligned { .. }));
    }

    #[test]
    fn test_fast_source_recovers_without_duplicates() {
        // Source 1 stamps twice too fast for five seconds, then is corrected.
        let queues = sources(vec![
            (0..4000).map(|n| stamp(n, 1.0)).collect(),
            (0..4000)
                .map(|n| if n < 150 { stamp(n, 2.0) } else { stamp(n, 1.0) })
                .collect(),
            (0..4000).map(|n| stamp(n, 1.0)).collect(),
        ]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(25, 1)));
        let max_spread = sync.params().max_spread_us;

        let mut notices = Vec::new();
        let sets: Vec<FrameSet> = (0..800)
            .map(|_| sync.next_set(|n| notices.push(n)).unwrap())
            .collect();

        assert!(notices
            .iter()
            .any(|n| matches!(n, SyncNotice::Drift { .. })));
        assert!(matches!(notices.last(), Some(SyncNotice::Aligned { .. })));

        for set in &sets[sets.len() - 100..] {
            assert!(set.spread_us() <= max_spread);
        }
        for source in [0, 2] {
            let stamps: Vec<i64> = sets
                .iter()
                .map(|s| s.get(source).unwrap().timestamp_us())
                .collect();
            assert!(stamps.windows(2).all(|w| w[1] > w[0]));
        }
    }

    #[test]
    fn test_sentinel_ends_source() {
        let queues = sources(vec![vec![0, 33_333], vec![0]]);
        queues[1].restart();
        queues[1].push(Frame::end_of_stream());
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(0, 60)));

        assert_eq!(
            sync.next_set(|_| {}).unwrap_err(),
            SyncHalt::SourceEnded { index: 1 }
        );
    }

    #[test]
    fn test_stopped_queue_halts() {
        let queues = sources(vec![vec![0, 33_333], vec![0]]);
        let mut sync = Synchronizer::new(queues, SyncParams::new(30, &config(1, 60)));
        assert_eq!(sync.source_count(), 2);
        assert_eq!(sync.next_set(|_| {}).unwrap_err(), SyncHalt::Stopped);
    }
}
