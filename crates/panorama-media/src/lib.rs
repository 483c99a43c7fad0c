//! Shared frames, bounded frame queues and image helpers.
//!
//! Every stage of the panorama pipeline exchanges [`Frame`]s (or
//! synchronized [`FrameSet`]s) through the queues defined here. Frame
//! payloads are reference-counted, so a frame fanned out to several
//! queues is never copied.

mod container;
mod error;
mod fps;
mod frame;
mod image;
mod latest;
mod overlay;
mod pool;
mod queue;
mod timestamp_queue;

pub use container::{encode_frame, read_frame, read_header, write_header, CONTAINER_MAGIC};
pub use error::MediaError;
pub use fps::FrameRateEstimator;
pub use frame::{
    AudioInfo, Frame, FrameSet, MediaInfo, MediaKind, PixelFormat, SampleFormat, Timestamped,
    VideoInfo,
};
pub use image::resize_nearest;
pub use latest::LatestValue;
pub use overlay::{Logo, LogoOverlay};
pub use pool::FramePool;
pub use queue::{BoundedQueue, OverflowPolicy, Stoppable};
pub use timestamp_queue::TimestampQueue;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Capacity of each per-camera capture queue.
pub const SOURCE_QUEUE_CAPACITY: usize = 16;

/// Capacity of the synchronized frame-set queues.
pub const SYNCED_QUEUE_CAPACITY: usize = 4;

/// Capacity of the composited-frame preview and post-processing queues.
pub const STITCHED_QUEUE_CAPACITY: usize = 4;

/// Capacity of the force-wait, timestamp-ordered sink queues (live stream, file save).
pub const SINK_QUEUE_CAPACITY: usize = 32;
