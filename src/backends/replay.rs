//! Replay backend that loops over JPEG files in a directory

use bytes::Bytes;
use image::ImageDecoder;
use image::codecs::jpeg::JpegDecoder;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::backend::{CaptureBackend, CaptureFormat, WaitResult};
use crate::types::{FrameSize, PixelFormat};
use crate::{DriverError, Result};

/// Replay backend for development and tests.
///
/// Loads every `.jpg`/`.jpeg` file in a directory, sorted by name, and hands them out at the
/// configured frame rate, looping forever.
pub struct ReplayBackend {
    /// Source directory
    path: PathBuf,

    /// Loaded payloads in playback order
    frames: Vec<Bytes>,

    /// Next frame to hand out
    position: usize,

    /// Frame pacing
    period: Duration,
    next_due: Option<Instant>,

    /// Frame signalled ready by the last wait
    ready: bool,
    streaming: bool,
}

impl ReplayBackend {
    /// Open a replay directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let file = entry?.path();
            let is_jpeg = file
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
            if is_jpeg {
                files.push(file);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(DriverError::device_error_with_source(
                "open",
                format!("no JPEG frames found in {}", path.display()),
            ));
        }

        let frames = files
            .iter()
            .map(|file| std::fs::read(file).map(Bytes::from))
            .collect::<std::io::Result<Vec<_>>>()?;

        info!("Opened replay directory {}: {} frames", path.display(), frames.len());

        Ok(Self {
            path,
            frames,
            position: 0,
            period: Duration::from_secs(1) / 30,
            next_due: None,
            ready: false,
            streaming: false,
        })
    }

    /// Number of distinct frames in the loop
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn first_frame_size(&self) -> Option<FrameSize> {
        let first = self.frames.first()?;
        let decoder = JpegDecoder::new(Cursor::new(first.as_ref())).ok()?;
        let (width, height) = decoder.dimensions();
        Some(FrameSize { width, height })
    }
}

impl CaptureBackend for ReplayBackend {
    fn configure(&mut self, format: &CaptureFormat) -> Result<FrameSize> {
        if format.pixel_format != PixelFormat::Mjpeg {
            return Err(DriverError::device_error_with_source(
                "configure",
                format!("replay only produces MJPEG, {} requested", format.pixel_format),
            ));
        }
        self.period = Duration::from_secs(1) / format.fps.max(1);

        let size = self
            .first_frame_size()
            .unwrap_or(FrameSize { width: format.width, height: format.height });
        debug!("Replay configured: {} @ {}fps", size, format.fps);
        Ok(size)
    }

    fn start(&mut self) -> Result<()> {
        self.streaming = true;
        self.next_due = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.streaming = false;
        self.ready = false;
        self.next_due = None;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<WaitResult> {
        if !self.streaming {
            return Err(DriverError::device_error("wait_for_frame on stopped stream"));
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        let remaining = due.saturating_duration_since(now);

        if remaining > timeout {
            std::thread::sleep(timeout);
            return Ok(WaitResult::Timeout);
        }

        std::thread::sleep(remaining);
        self.next_due = Some(due + self.period);
        self.ready = true;
        Ok(WaitResult::Ready)
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        if !self.ready {
            return Err(DriverError::device_error("read_frame without a ready frame"));
        }
        self.ready = false;
        let frame = self.frames[self.position].clone();
        self.position = (self.position + 1) % self.frames.len();
        Ok(frame)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Mjpeg
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_jpeg;

    fn format(fps: u32) -> CaptureFormat {
        CaptureFormat { width: 640, height: 480, fps, pixel_format: PixelFormat::Mjpeg }
    }

    fn replay_dir(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            std::fs::write(dir.path().join(format!("frame_{i:03}.jpg")), tiny_jpeg(i as u8)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"not a frame").unwrap();
        dir
    }

    #[test]
    fn open_rejects_directory_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReplayBackend::open(dir.path());
        assert!(matches!(result, Err(DriverError::Device { .. })));
    }

    #[test]
    fn open_missing_directory_is_io_error() {
        let result = ReplayBackend::open("/nonexistent/replay/dir");
        assert!(matches!(result, Err(DriverError::Io(_))));
    }

    #[test]
    fn configure_reports_jpeg_dimensions() {
        let dir = replay_dir(2);
        let mut backend = ReplayBackend::open(dir.path()).unwrap();
        assert_eq!(backend.frame_count(), 2);

        let size = backend.configure(&format(30)).unwrap();
        assert_eq!(size, FrameSize { width: 8, height: 8 });
    }

    #[test]
    fn configure_rejects_raw_formats() {
        let dir = replay_dir(1);
        let mut backend = ReplayBackend::open(dir.path()).unwrap();
        let mut raw = format(30);
        raw.pixel_format = PixelFormat::Yuyv;
        assert!(backend.configure(&raw).is_err());
    }

    #[test]
    fn frames_loop_in_name_order() {
        let dir = replay_dir(3);
        let mut backend = ReplayBackend::open(dir.path()).unwrap();
        backend.configure(&format(120)).unwrap();
        backend.start().unwrap();

        let expected = [tiny_jpeg(0), tiny_jpeg(1), tiny_jpeg(2), tiny_jpeg(0)];
        for want in expected {
            assert_eq!(backend.wait_for_frame(Duration::from_secs(1)).unwrap(), WaitResult::Ready);
            assert_eq!(backend.read_frame().unwrap().as_ref(), want.as_slice());
        }
    }

    #[test]
    fn wait_times_out_before_next_frame_is_due() {
        let dir = replay_dir(1);
        let mut backend = ReplayBackend::open(dir.path()).unwrap();
        backend.configure(&format(1)).unwrap();
        backend.start().unwrap();

        assert_eq!(backend.wait_for_frame(Duration::from_millis(10)).unwrap(), WaitResult::Ready);
        backend.read_frame().unwrap();
        assert_eq!(backend.wait_for_frame(Duration::from_millis(10)).unwrap(), WaitResult::Timeout);
        assert!(backend.read_frame().is_err());
    }

    #[test]
    fn stopped_backend_reports_error() {
        let dir = replay_dir(1);
        let mut backend = ReplayBackend::open(dir.path()).unwrap();
        assert!(backend.wait_for_frame(Duration::from_millis(1)).is_err());

        backend.start().unwrap();
        backend.stop().unwrap();
        backend.stop().unwrap();
        assert!(backend.wait_for_frame(Duration::from_millis(1)).is_err());
        assert!(backend.describe().starts_with("replay:"));
    }
}
