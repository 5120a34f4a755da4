//! Network stream capture through an ffmpeg subprocess.
//!
//! ffmpeg decodes the stream and writes raw RGB24 frames of a fixed size to
//! stdout. A reader thread slices stdout into frames and feeds a
//! [`LatestFrameQueue`]; `read` drains that queue and hands back only the
//! newest frame.

use crate::frame::{packed_len, Frame};
use crate::queue::{LatestFrameQueue, Take};
use crate::source::{FrameSource, SourceError};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    /// Queued frames drained per read; only the newest is kept.
    pub drain_frames: usize,
    /// How long a read waits for a frame before reporting a stall.
    pub stall_timeout: Duration,
    pub ffmpeg_path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            drain_frames: 10,
            stall_timeout: Duration::from_secs(5),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

struct Decoder {
    child: Child,
    queue: Arc<LatestFrameQueue>,
    reader: Option<JoinHandle<()>>,
}

impl Decoder {
    fn spawn(url: &str, config: &StreamConfig) -> Result<Self, SourceError> {
        let mut command = Command::new(&config.ffmpeg_path);
        if url.starts_with("rtsp://") {
            command.args(["-rtsp_transport", "tcp"]);
        }
        let mut child = command
            .args(["-fflags", "nobuffer", "-i", url])
            .arg("-vf")
            .arg(format!("scale={}:{}", config.width, config.height))
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-an", "-loglevel", "error", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SourceError::Unavailable(format!("failed to spawn {}: {e}", config.ffmpeg_path)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Unavailable("ffmpeg stdout not captured".to_string()))?;

        // Capacity covers one drain; anything older is already stale.
        let queue = Arc::new(LatestFrameQueue::new(config.drain_frames.max(1)));
        let reader = {
            let queue = Arc::clone(&queue);
            let (width, height) = (config.width, config.height);
            thread::Builder::new()
                .name("facegate-stream".into())
                .spawn(move || pump_frames(stdout, width, height, &queue))
                .map_err(|e| SourceError::Unavailable(format!("failed to spawn reader thread: {e}")))?
        };

        Ok(Self {
            child,
            queue,
            reader: Some(reader),
        })
    }

    fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Slice a raw RGB24 byte stream into frames until EOF, then close the queue.
pub(crate) fn pump_frames<R: Read>(mut input: R, width: u32, height: u32, queue: &LatestFrameQueue) {
    let frame_len = packed_len(width, height, 3);
    let mut sequence = 0u64;
    loop {
        let mut buf = vec![0u8; frame_len];
        match input.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!(error = %e, "stream read failed");
                break;
            }
        }
        let Some(image) = RgbImage::from_raw(width, height, buf) else {
            break;
        };
        queue.push(Frame::new(image, sequence));
        sequence += 1;
    }
    tracing::debug!(frames = sequence, "stream reader finished");
    queue.close();
}

/// Network stream source with drop-stale reads.
pub struct NetworkStream {
    url: String,
    config: StreamConfig,
    decoder: Option<Decoder>,
}

impl NetworkStream {
    /// Start decoding `url`. Fails if the decoder cannot be launched.
    pub fn open(url: &str, config: StreamConfig) -> Result<Self, SourceError> {
        let decoder = Decoder::spawn(url, &config)?;
        tracing::info!(
            url,
            width = config.width,
            height = config.height,
            drain = config.drain_frames,
            "network stream opened"
        );
        Ok(Self {
            url: url.to_string(),
            config,
            decoder: Some(decoder),
        })
    }
}

impl FrameSource for NetworkStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if self.decoder.is_none() {
            tracing::info!(url = %self.url, "restarting stream decoder");
            self.decoder = Some(Decoder::spawn(&self.url, &self.config)?);
        }
        let Some(decoder) = &self.decoder else {
            return Err(SourceError::Unavailable(self.url.clone()));
        };

        match decoder.queue.take_latest(self.config.drain_frames, self.config.stall_timeout) {
            Take::Frame { frame, discarded } => {
                if discarded > 0 {
                    tracing::trace!(discarded, "dropped stale frames");
                }
                Ok(frame)
            }
            Take::TimedOut => Err(SourceError::Stalled(self.config.stall_timeout)),
            Take::Closed => {
                tracing::warn!(url = %self.url, "stream decoder exited");
                self.decoder = None;
                Err(SourceError::Unavailable(format!("{}: decoder exited", self.url)))
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw_frames(count: u8, width: u32, height: u32) -> Vec<u8> {
        (0..count)
            .flat_map(|i| vec![i; packed_len(width, height, 3)])
            .collect()
    }

    #[test]
    fn test_pump_then_take_returns_newest() {
        let queue = LatestFrameQueue::new(10);
        pump_frames(Cursor::new(raw_frames(6, 4, 2)), 4, 2, &queue);

        match queue.take_latest(10, Duration::from_millis(10)) {
            Take::Frame { frame, discarded } => {
                assert_eq!(discarded, 5);
                assert_eq!(frame.sequence, 5);
                assert_eq!(frame.image.get_pixel(0, 0)[0], 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(queue.take_latest(10, Duration::from_millis(10)), Take::Closed));
    }

    #[test]
    fn test_pump_ignores_trailing_partial_frame() {
        let queue = LatestFrameQueue::new(10);
        let mut bytes = raw_frames(2, 4, 2);
        bytes.extend_from_slice(&[9; 5]);
        pump_frames(Cursor::new(bytes), 4, 2, &queue);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_open_with_missing_decoder_fails() {
        let config = StreamConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..StreamConfig::default()
        };
        assert!(matches!(
            NetworkStream::open("rtsp://127.0.0.1/none", config),
            Err(SourceError::Unavailable(_))
        ));
    }
}
