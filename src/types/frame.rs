//! Frame types flowing from the capture backend to the distributors

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Declared pixel format of a captured payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Motion JPEG: every payload is a complete JPEG image
    Mjpeg,
    /// Packed YUV 4:2:2
    Yuyv,
}

impl PixelFormat {
    /// V4L2 FourCC code for this format
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    /// Parse a V4L2 FourCC code
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    /// Whether payloads in this format can be served as `image/jpeg` without conversion
    pub fn is_jpeg(self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Mjpeg => f.write_str("MJPEG"),
            PixelFormat::Yuyv => f.write_str("YUYV"),
        }
    }
}

/// Raw payload handed from the capture loop to the store.
///
/// The store assigns the sequence number on publish.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub format: PixelFormat,
    pub captured_at: Instant,
}

impl CapturedFrame {
    /// Create a frame captured now
    pub fn new(data: impl Into<Bytes>, format: PixelFormat) -> Self {
        Self { data: data.into(), format, captured_at: Instant::now() }
    }
}

/// A published frame.
///
/// The payload is reference counted and immutable, so handing a `Frame` to a consumer never
/// exposes a buffer the capture loop will write into again.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame payload (zero-copy via `Bytes`)
    pub data: Bytes,

    /// Monotonic sequence number, starting at 1
    pub sequence: u64,

    /// Monotonic capture timestamp
    pub captured_at: Instant,

    /// Declared payload format
    pub format: PixelFormat,
}

impl Frame {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Negotiated frame geometry reported by a backend after configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
