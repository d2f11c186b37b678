//! Hardware abstraction layer messaging.
//!
//! Versioned JSON envelopes on a message bus: periodic camera status, throttled frame
//! metadata, and inbound control commands. Frame bytes never travel on the bus; consumers
//! fetch them from the HTTP surface using the advertised URL.

pub mod bus;
pub mod commands;
pub mod envelope;
pub mod publisher;
#[cfg(feature = "zenoh")]
pub mod zenoh;

pub use bus::{Bus, LocalBus, MessageStream};
pub use commands::CommandListener;
pub use envelope::{
    CameraStatus, ControlCommand, ControlPayload, Envelope, FramePayload, StatusPayload, schema, subject,
};
pub use publisher::{CameraDescriptor, HalPublisher};
