//! Stream distributors.
//!
//! Each distributor reads the [`FrameStore`](crate::store::FrameStore) at its own pace and owns
//! only the resources of its own connection:
//!
//! - [`multipart`] - pull-based MJPEG over HTTP, read-then-sleep per client
//! - [`push`] - timer-driven binary frames over a bidirectional socket
//! - [`feeder`] - one media sample per tick into the real-time transport, skipped when no
//!   peer is connected
//!
//! Within one distributor delivered sequence numbers never go backwards; repeats are allowed
//! when the distributor runs faster than capture.

pub mod feeder;
pub mod multipart;
pub mod push;
pub mod ticker;

pub use push::{ClientEvent, PushEnd};
pub use ticker::{ThrottleExt, pacing_interval};
