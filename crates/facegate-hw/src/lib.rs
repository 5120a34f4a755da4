//! facegate-hw: frame acquisition from V4L2 cameras and network streams.
//!
//! Every source yields RGB [`Frame`]s through the [`FrameSource`] trait.
//! Network streams go through a drop-stale queue so the consumer always
//! works on the newest frame.

pub mod camera;
pub mod frame;
pub mod queue;
pub mod source;
pub mod stream;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::{Frame, FrameError};
pub use queue::LatestFrameQueue;
pub use source::{FrameSource, Pacer, SourceError, VideoSource};
pub use stream::{NetworkStream, StreamConfig};
