//! Error types for the camera driver.
//!
//! Errors are grouped by how far they are allowed to travel:
//!
//! - **Fatal-to-start**: the device cannot be opened, configured or started. These are
//!   returned from [`CaptureWorker::start`](crate::capture::CaptureWorker::start) and the
//!   process should not proceed.
//! - **Transient capture**: read errors and conversion failures. They are recorded in the
//!   [`FrameStore`](crate::store::FrameStore) statistics and capture continues.
//! - **Per-consumer**: write failures, malformed client messages, unknown peers. They end
//!   one consumer's task and nothing else.
//! - **Signaling**: bad offers or negotiation failures, reported back over the signaling
//!   channel where possible.
//!
//! ```rust
//! use camera_driver::DriverError;
//!
//! let error = DriverError::conversion_failed("YUYV", "no encoder configured");
//! assert!(error.is_transient());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for driver operations.
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// Main error type for driver operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DriverError {
    #[error("Capture is already running")]
    AlreadyRunning,

    #[error("Device error during {operation}")]
    Device {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("No frame available")]
    NoFrame,

    #[error("Cannot convert {format} frame to JPEG: {reason}")]
    Conversion { format: String, reason: String },

    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: String },

    #[error("Signaling error: {reason}")]
    Signaling { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Control bus error during {operation}: {reason}")]
    Bus { operation: String, reason: String },

    #[error("{feature} requires {requirement}")]
    Unsupported { feature: String, requirement: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Returns whether capture should carry on after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Device { .. } => true,
            DriverError::Timeout { .. } => true,
            DriverError::Conversion { .. } => true,
            DriverError::NoFrame => true,
            DriverError::Io(_) => true,
            DriverError::AlreadyRunning => false,
            DriverError::PeerNotFound { .. } => false,
            DriverError::Signaling { .. } => false,
            DriverError::Transport(_) => false,
            DriverError::Config { .. } => false,
            DriverError::Bus { .. } => false,
            DriverError::Unsupported { .. } => false,
        }
    }

    /// Returns whether this error, raised while starting, means the device is unusable.
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            DriverError::Device { .. }
                | DriverError::Config { .. }
                | DriverError::Unsupported { .. }
                | DriverError::Io(_)
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DriverError::AlreadyRunning => vec!["Stop capture before starting it again"],
            DriverError::Device { .. } => vec![
                "Check the device is connected and not used by another process",
                "Verify read permissions on the device node",
                "Try a different resolution or pixel format",
            ],
            DriverError::Timeout { .. } => vec![
                "Check lighting conditions and exposure settings",
                "Increase the frame wait timeout",
            ],
            DriverError::NoFrame => vec!["Wait for capture to produce its first frame"],
            DriverError::Conversion { .. } => vec![
                "Configure the camera for MJPEG output",
                "Enable frame conversion with `camera.conversion: encode`",
            ],
            DriverError::PeerNotFound { .. } => {
                vec!["Send an offer before sending ICE candidates"]
            }
            DriverError::Signaling { .. } => vec![
                "Check the SDP offer is well formed",
                "Verify the client supports the offered codec",
            ],
            DriverError::Transport(_) => vec![
                "Check STUN/TURN server reachability",
                "Reconnect the signaling channel",
            ],
            DriverError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Review TAFY_CAMERA_* environment overrides",
            ],
            DriverError::Bus { .. } => vec![
                "Check the control bus endpoint is reachable",
                "Verify the node id produces a valid subject",
            ],
            DriverError::Unsupported { .. } => {
                vec!["Rebuild with the required cargo feature enabled"]
            }
            DriverError::Io(_) => vec!["Check file permissions and available disk space"],
        }
    }

    /// Helper constructor for device errors.
    pub fn device_error(operation: impl Into<String>) -> Self {
        DriverError::Device { operation: operation.into(), source: None }
    }

    /// Helper constructor for device errors with source.
    pub fn device_error_with_source(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DriverError::Device { operation: operation.into(), source: Some(source.into()) }
    }

    /// Helper constructor for conversion failures.
    pub fn conversion_failed(format: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::Conversion { format: format.into(), reason: reason.into() }
    }

    /// Helper constructor for unknown peers.
    pub fn peer_not_found(peer_id: impl Into<String>) -> Self {
        DriverError::PeerNotFound { peer_id: peer_id.into() }
    }

    /// Helper constructor for signaling failures.
    pub fn signaling(reason: impl Into<String>) -> Self {
        DriverError::Signaling { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        DriverError::Config { reason: reason.into() }
    }

    /// Helper constructor for control bus errors.
    pub fn bus(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::Bus { operation: operation.into(), reason: reason.into() }
    }

    /// Helper constructor for features compiled out of this build.
    pub fn unsupported(feature: impl Into<String>, requirement: impl Into<String>) -> Self {
        DriverError::Unsupported { feature: feature.into(), requirement: requirement.into() }
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Signaling { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            operation in "\\w+",
            peer_id in "peer-[0-9a-f]{8}",
            format in "[A-Z]{4}",
            reason in ".*",
            duration_ms in 1u64..60000u64
          ) {
            let device = DriverError::device_error(operation.clone());
            prop_assert!(device.to_string().contains(&operation));

            let peer = DriverError::peer_not_found(peer_id.clone());
            prop_assert!(peer.to_string().contains(&peer_id));

            let conversion = DriverError::conversion_failed(format.clone(), reason.clone());
            let message = conversion.to_string();
            prop_assert!(message.contains(&format));
            prop_assert!(message.contains(&reason));

            let timeout = DriverError::Timeout { duration: Duration::from_millis(duration_ms) };
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn device_source_chain_is_preserved(base_message in ".+") {
            let err = DriverError::device_error_with_source(
                "read_frame",
                std::io::Error::other(base_message.clone()),
            );
            let source = std::error::Error::source(&err).expect("source should be kept");
            prop_assert!(source.to_string().contains(&base_message));
          }
        }
    }

    #[test]
    fn classification_matches_error_taxonomy() {
        assert!(DriverError::device_error("read_frame").is_transient());
        assert!(DriverError::conversion_failed("YUYV", "stub").is_transient());
        assert!(!DriverError::AlreadyRunning.is_transient());
        assert!(!DriverError::peer_not_found("p1").is_transient());

        assert!(DriverError::device_error("open").is_fatal_to_start());
        assert!(DriverError::config("fps").is_fatal_to_start());
        assert!(!DriverError::AlreadyRunning.is_fatal_to_start());
        assert!(!DriverError::Timeout { duration: Duration::from_secs(5) }.is_fatal_to_start());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DriverError>();

        let error = DriverError::NoFrame;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            DriverError::AlreadyRunning,
            DriverError::device_error("start"),
            DriverError::peer_not_found("p1"),
            DriverError::unsupported("V4L2 capture", "the `v4l` feature"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn from_conversions_work() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing frame dir");
        let err: DriverError = io_err.into();
        assert!(matches!(err, DriverError::Io(_)));

        let transport: DriverError = TransportError::ClosedPipe.into();
        assert!(matches!(transport, DriverError::Transport(TransportError::ClosedPipe)));

        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DriverError = json_err.into();
        assert!(matches!(err, DriverError::Signaling { .. }));
    }
}
