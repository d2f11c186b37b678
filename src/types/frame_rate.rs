//! Output pacing for distributors

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest rate any distributor will pace at
pub const MAX_FPS: u32 = 120;

/// Per-distributor output rate.
///
/// Each distributor paces itself off its own rate, independent of how fast the device
/// captures. A client slower than the camera sees the same frame repeated, never a throttled
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRate(u32);

impl FrameRate {
    /// Create a rate, clamped to `1..=MAX_FPS`
    pub fn new(fps: u32) -> Self {
        Self(fps.clamp(1, MAX_FPS))
    }

    pub fn fps(self) -> u32 {
        self.0
    }

    /// Time between two deliveries
    pub fn period(self) -> Duration {
        Duration::from_secs(1) / self.0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(30)
    }
}

impl From<u32> for FrameRate {
    fn from(fps: u32) -> Self {
        Self::new(fps)
    }
}
