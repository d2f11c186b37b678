//! Capture backend implementations.
//!
//! - [`ReplayBackend`] - loops over JPEG files, available everywhere
//! - [`V4l2Backend`] - V4L2 capture on Linux (feature `v4l`)

use serde::{Deserialize, Serialize};

use crate::backend::CaptureBackend;
use crate::Result;

pub mod replay;
#[cfg(all(target_os = "linux", feature = "v4l"))]
pub mod v4l2;

pub use replay::ReplayBackend;
#[cfg(all(target_os = "linux", feature = "v4l"))]
pub use v4l2::V4l2Backend;

/// Which backend drives the device path.
///
/// Defaults to V4L2 when it is compiled in, otherwise to replay, where `device` names a
/// directory of JPEG files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[cfg_attr(all(target_os = "linux", feature = "v4l"), default)]
    V4l2,
    #[cfg_attr(not(all(target_os = "linux", feature = "v4l")), default)]
    Replay,
}

/// Open the backend selected by `kind` on `device`.
pub fn open_backend(kind: BackendKind, device: &str) -> Result<Box<dyn CaptureBackend>> {
    match kind {
        BackendKind::Replay => Ok(Box::new(ReplayBackend::open(device)?)),
        BackendKind::V4l2 => open_v4l2(device),
    }
}

#[cfg(all(target_os = "linux", feature = "v4l"))]
fn open_v4l2(device: &str) -> Result<Box<dyn CaptureBackend>> {
    Ok(Box::new(V4l2Backend::open(device)?))
}

#[cfg(not(all(target_os = "linux", feature = "v4l")))]
fn open_v4l2(_device: &str) -> Result<Box<dyn CaptureBackend>> {
    Err(crate::DriverError::unsupported("V4L2 capture", "Linux and the `v4l` feature"))
}
