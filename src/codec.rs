//! Frame conversion to JPEG for formats the distributors cannot serve directly

use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

use crate::types::{FrameSize, PixelFormat};
use crate::{DriverError, Result};

/// Conversion capability used by the capture loop for non-JPEG payloads.
pub trait FrameConverter: Send + Sync + 'static {
    /// Convert a raw payload in `format` to a JPEG image
    fn convert(&self, data: &[u8], format: PixelFormat) -> Result<Bytes>;
}

/// How the capture loop treats payloads that are not already JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Drop the frame and count it as a capture error
    #[default]
    Reject,
    /// Encode to JPEG in software
    Encode,
}

/// Build the converter for `mode`.
pub fn converter_for(mode: ConversionMode, size: FrameSize, quality: u8) -> Box<dyn FrameConverter> {
    match mode {
        ConversionMode::Reject => Box::new(RejectConverter),
        ConversionMode::Encode => Box::new(YuyvJpegConverter::new(size, quality)),
    }
}

/// Converter that refuses everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectConverter;

impl FrameConverter for RejectConverter {
    fn convert(&self, _data: &[u8], format: PixelFormat) -> Result<Bytes> {
        Err(DriverError::conversion_failed(
            format.to_string(),
            "conversion disabled, capture in MJPEG or set camera.conversion: encode",
        ))
    }
}

/// Software YUYV 4:2:2 to JPEG encoder.
#[derive(Debug, Clone, Copy)]
pub struct YuyvJpegConverter {
    size: FrameSize,
    quality: u8,
}

impl YuyvJpegConverter {
    pub fn new(size: FrameSize, quality: u8) -> Self {
        Self { size, quality: quality.clamp(1, 100) }
    }
}

impl FrameConverter for YuyvJpegConverter {
    fn convert(&self, data: &[u8], format: PixelFormat) -> Result<Bytes> {
        if format != PixelFormat::Yuyv {
            return Err(DriverError::conversion_failed(format.to_string(), "only YUYV can be encoded"));
        }

        let FrameSize { width, height } = self.size;
        let expected = width as usize * height as usize * 2;
        if data.len() != expected {
            return Err(DriverError::conversion_failed(
                "YUYV",
                format!("expected {} bytes for {}, got {}", expected, self.size, data.len()),
            ));
        }

        let rgb = yuyv_to_rgb(data);
        let mut out = Vec::with_capacity(expected / 4);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(&rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| DriverError::conversion_failed("YUYV", e.to_string()))?;
        Ok(Bytes::from(out))
    }
}

/// BT.601 limited-range YUYV to packed RGB.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
