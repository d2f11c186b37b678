//! Capture backend trait for frame sources

use bytes::Bytes;
use std::time::Duration;

use crate::Result;
use crate::types::{FrameSize, PixelFormat};

/// Requested capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

/// Outcome of waiting for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A frame is ready to be read
    Ready,
    /// Nothing arrived within the wait window
    Timeout,
}

/// Trait for device capture backends.
///
/// Backends are blocking: the capture worker drives them from a dedicated blocking thread,
/// so implementations may sleep or poll a file descriptor freely. Opening the device is the
/// backend's constructor and closing it is `Drop`.
pub trait CaptureBackend: Send + 'static {
    /// Apply a capture format.
    ///
    /// Returns the geometry the device actually accepted, which may differ from the request.
    fn configure(&mut self, format: &CaptureFormat) -> Result<FrameSize>;

    /// Begin streaming
    fn start(&mut self) -> Result<()>;

    /// Stop streaming. Calling this while stopped is not an error.
    fn stop(&mut self) -> Result<()>;

    /// Block until a frame is ready or `timeout` elapses.
    ///
    /// Returns:
    /// - `Ok(WaitResult::Ready)` - call [`read_frame`](Self::read_frame) next
    /// - `Ok(WaitResult::Timeout)` - nothing arrived, expected under starvation
    /// - `Err(e)` - a read error the device is expected to recover from
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<WaitResult>;

    /// Take the frame signalled by the last successful wait
    fn read_frame(&mut self) -> Result<Bytes>;

    /// Format of the payloads returned by [`read_frame`](Self::read_frame)
    fn pixel_format(&self) -> PixelFormat;

    /// Human-readable device description for logs and `/api/v1/info`
    fn describe(&self) -> String;
}
