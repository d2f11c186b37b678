//! Core types for the frame pipeline.
//!
//! - [`CapturedFrame`] is what a capture backend produces: an opaque payload and its declared
//!   [`PixelFormat`].
//! - [`Frame`] is what the [`FrameStore`](crate::store::FrameStore) publishes: the same payload
//!   plus its sequence number.
//! - [`FrameRate`] paces each distributor independently of the capture rate.
//!
//! ```rust
//! use camera_driver::types::{FrameRate, PixelFormat};
//! use std::time::Duration;
//!
//! assert_eq!(FrameRate::new(10).period(), Duration::from_millis(100));
//! assert_eq!(PixelFormat::from_fourcc(*b"MJPG"), Some(PixelFormat::Mjpeg));
//! ```

mod frame;
mod frame_rate;

pub use frame::{CapturedFrame, Frame, FrameSize, PixelFormat};
pub use frame_rate::{FrameRate, MAX_FPS};

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        #[test]
        fn prop_frame_rate_always_in_range(fps in any::<u32>()) {
            let rate = FrameRate::new(fps);
            prop_assert!(rate.fps() >= 1);
            prop_assert!(rate.fps() <= MAX_FPS);
            prop_assert!(rate.period() >= Duration::from_secs(1) / MAX_FPS);
            prop_assert!(rate.period() <= Duration::from_secs(1));
        }
    }

    #[test]
    fn frame_rate_period_matches_fps() {
        assert_eq!(FrameRate::new(30).period(), Duration::from_nanos(33_333_333));
        assert_eq!(FrameRate::new(1).period(), Duration::from_secs(1));
        assert_eq!(FrameRate::new(0).fps(), 1);
    }

    #[test]
    fn pixel_format_fourcc_round_trip() {
        for format in [PixelFormat::Mjpeg, PixelFormat::Yuyv] {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(*b"H264"), None);
        assert!(PixelFormat::Mjpeg.is_jpeg());
        assert!(!PixelFormat::Yuyv.is_jpeg());
    }

    #[test]
    fn pixel_format_serializes_as_config_names() {
        assert_eq!(serde_json::to_string(&PixelFormat::Mjpeg).unwrap(), "\"MJPEG\"");
        let parsed: PixelFormat = serde_json::from_str("\"YUYV\"").unwrap();
        assert_eq!(parsed, PixelFormat::Yuyv);
        assert_eq!(PixelFormat::Yuyv.to_string(), "YUYV");
    }

    #[test]
    fn frame_size_displays_as_resolution() {
        assert_eq!(FrameSize { width: 640, height: 480 }.to_string(), "640x480");
    }
}
