//! USB camera node driver.
//!
//! One capture worker publishes the latest frame into a single-slot [`FrameStore`]. Any
//! number of independently paced consumers read it:
//!
//! - **MJPEG** over HTTP (`/stream`), one pull loop per client
//! - **WebSocket** push (`/ws`), one timer-driven binary frame per tick
//! - **WebRTC** (`/webrtc`), a sample feeder writing into a shared track bound to every
//!   negotiated peer, with the [`SessionManager`] running the signaling state machine
//!
//! A slow or stalled consumer never blocks capture or other consumers: the store is
//! latest-wins with no queue, so every reader is bounded by one frame of memory.
//!
//! Status and frame metadata are announced on a HAL control bus ([`hal`]), which also
//! carries start/stop commands back to the capture worker.
//!
//! ## Example (replay)
//!
//! ```rust,no_run
//! use camera_driver::backends::ReplayBackend;
//! use camera_driver::{CaptureFormat, CaptureWorker, FrameStore, PixelFormat};
//!
//! #[tokio::main]
//! async fn main() -> camera_driver::Result<()> {
//!     let backend = ReplayBackend::open("./recordings/bench")?;
//!     let worker = CaptureWorker::new(Box::new(backend), FrameStore::new());
//!     worker
//!         .configure(CaptureFormat { width: 640, height: 480, fps: 15, pixel_format: PixelFormat::Mjpeg })
//!         .await?;
//!     worker.start().await?;
//!
//!     let frame = worker.store().next_frame_after(0, std::time::Duration::from_secs(1)).await?;
//!     println!("frame {} ({} bytes)", frame.sequence, frame.len());
//!     worker.stop().await
//! }
//! ```

mod error;
#[cfg_attr(any(test, feature = "test-utils"), path = "test_utils.rs")]
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

// Capture pipeline
pub mod backend;
pub mod backends;
pub mod capture;
pub mod codec;
pub mod store;

// Distribution
pub mod session;
pub mod stream;
pub mod transport;

// Outer surfaces
pub mod config;
pub mod hal;
pub mod server;

pub use backend::{CaptureBackend, CaptureFormat, WaitResult};
pub use capture::{CapturePhase, CaptureWorker};
pub use config::Config;
pub use error::*;
pub use session::{PeerId, SessionManager, SessionStats};
pub use store::{FrameSource, FrameStore, StoreStats};
pub use transport::{Transport, TransportError};
pub use types::*;
