//! Frame source abstraction: local camera or network stream, plus rate pacing.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use crate::stream::{NetworkStream, StreamConfig};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source stalled: no frame within {0:?}")]
    Stalled(Duration),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
}

/// Anything the gating loop can pull frames from.
pub trait FrameSource: Send {
    /// Block until the most recent frame is available.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Frame, SourceError> {
        (**self).read()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Parsed video source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// V4L2 device node.
    Device(String),
    /// Anything ffmpeg can open: rtsp://, http://, file://, ...
    Url(String),
}

impl VideoSource {
    /// A bare index maps to `/dev/video<N>`, `scheme://...` is a network stream,
    /// anything else is taken as a device path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(index) = raw.parse::<u32>() {
            VideoSource::Device(format!("/dev/video{index}"))
        } else if raw.contains("://") {
            VideoSource::Url(raw.to_string())
        } else {
            VideoSource::Device(raw.to_string())
        }
    }

    /// Open the source. Failing here is fatal for the pipeline.
    pub fn open(&self, config: &StreamConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        match self {
            VideoSource::Device(path) => Ok(Box::new(Camera::open(path, config.width, config.height)?)),
            VideoSource::Url(url) => Ok(Box::new(NetworkStream::open(url, config.clone())?)),
        }
    }
}

impl std::fmt::Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoSource::Device(path) => write!(f, "{path}"),
            VideoSource::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Caps the processing rate independent of the source frame rate.
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    /// `target_fps <= 0` disables pacing.
    pub fn new(target_fps: f32) -> Self {
        let interval = if target_fps > 0.0 {
            Duration::from_secs_f32(1.0 / target_fps)
        } else {
            Duration::ZERO
        };
        Self { interval, last: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time still to wait at `now` before the next evaluation may start.
    pub fn delay_at(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => (last + self.interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next slot, then mark it taken.
    pub fn wait(&mut self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.last = Some(Instant::now());
    }

    pub fn mark(&mut self, at: Instant) {
        self.last = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_source() {
        assert_eq!(VideoSource::parse("0"), VideoSource::Device("/dev/video0".into()));
        assert_eq!(VideoSource::parse(" 2 "), VideoSource::Device("/dev/video2".into()));
        assert_eq!(
            VideoSource::parse("/dev/v4l/by-id/cam"),
            VideoSource::Device("/dev/v4l/by-id/cam".into())
        );
        assert_eq!(
            VideoSource::parse("rtsp://10.0.0.5:554/stream1"),
            VideoSource::Url("rtsp://10.0.0.5:554/stream1".into())
        );
    }

    #[test]
    fn test_pacer_delay() {
        let mut pacer = Pacer::new(4.0);
        assert_eq!(pacer.interval(), Duration::from_millis(250));

        let t0 = Instant::now();
        assert_eq!(pacer.delay_at(t0), Duration::ZERO);

        pacer.mark(t0);
        assert_eq!(pacer.delay_at(t0 + Duration::from_millis(100)), Duration::from_millis(150));
        assert_eq!(pacer.delay_at(t0 + Duration::from_millis(400)), Duration::ZERO);
    }

    #[test]
    fn test_pacer_disabled() {
        let mut pacer = Pacer::new(0.0);
        let t0 = Instant::now();
        pacer.mark(t0);
        assert_eq!(pacer.delay_at(t0), Duration::ZERO);
    }
}
