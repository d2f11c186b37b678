//! V4L2 capture backend (Linux, feature `v4l`)

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, FourCC, Format};

use crate::backend::{CaptureBackend, CaptureFormat, WaitResult};
use crate::types::{FrameSize, PixelFormat};
use crate::{DriverError, Result};

/// Number of mmap buffers queued with the driver
const BUFFER_COUNT: u32 = 4;

/// Memory-mapped V4L2 capture.
pub struct V4l2Backend {
    device: Device,
    path: String,
    format: PixelFormat,
    stream: Option<MmapStream<'static>>,

    /// Frame dequeued by the last successful wait
    pending: Option<Bytes>,
}

impl V4l2Backend {
    /// Open a V4L2 device node
    pub fn open(path: &str) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|e| DriverError::device_error_with_source(format!("open {path}"), e))?;

        if let Ok(caps) = device.query_caps() {
            info!("Opened {}: {} ({})", path, caps.card, caps.driver);
        }

        Ok(Self {
            device,
            path: path.to_string(),
            format: PixelFormat::Mjpeg,
            stream: None,
            pending: None,
        })
    }
}

impl CaptureBackend for V4l2Backend {
    fn configure(&mut self, format: &CaptureFormat) -> Result<FrameSize> {
        let requested = Format::new(format.width, format.height, FourCC::new(&format.pixel_format.fourcc()));
        let actual = self
            .device
            .set_format(&requested)
            .map_err(|e| DriverError::device_error_with_source("set_format", e))?;

        self.format = PixelFormat::from_fourcc(actual.fourcc.repr).ok_or_else(|| {
            DriverError::device_error_with_source(
                "set_format",
                format!("device selected unsupported format {}", actual.fourcc),
            )
        })?;

        if actual.width != format.width || actual.height != format.height {
            warn!(
                "Device adjusted resolution: requested {}x{}, got {}x{}",
                format.width, format.height, actual.width, actual.height
            );
        }

        // Frame interval support varies by device; capture still works without it
        if let Err(e) = self.device.set_params(&Parameters::with_fps(format.fps)) {
            warn!("Failed to set frame rate {}: {}", format.fps, e);
        }

        debug!("Configured {} as {}x{} {}", self.path, actual.width, actual.height, self.format);
        Ok(FrameSize { width: actual.width, height: actual.height })
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| DriverError::device_error_with_source("start", e))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // Dropping the stream issues STREAMOFF and unmaps the buffers
        self.stream = None;
        self.pending = None;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<WaitResult> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DriverError::device_error("wait_for_frame on stopped stream"))?;
        stream.set_timeout(timeout);

        match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                self.pending = Some(Bytes::copy_from_slice(&buf[..used]));
                Ok(WaitResult::Ready)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(WaitResult::Timeout),
            Err(e) => Err(DriverError::device_error_with_source("dequeue buffer", e)),
        }
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        self.pending
            .take()
            .ok_or_else(|| DriverError::device_error("read_frame without a ready frame"))
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn describe(&self) -> String {
        format!("v4l2:{}", self.path)
    }
}
