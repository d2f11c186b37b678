//! Single-slot, latest-wins frame store.
//!
//! One writer (the capture loop) replaces the current frame; any number of readers take a
//! snapshot of it. The state lives behind a `watch` channel so a reader always sees a
//! consistent `(frame, counters)` pair and never holds the lock longer than a refcount bump.
//! Counters are owned by the store instance and exposed through [`FrameStore::stats`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::types::{CapturedFrame, Frame};
use crate::{DriverError, Result};

/// Full store state, as seen by subscribers.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    current: Option<Frame>,
    frame_count: u64,
    error_count: u64,
    last_error: Option<Arc<DriverError>>,
    last_update: Option<DateTime<Utc>>,
}

impl StoreState {
    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            frame_count: self.frame_count,
            error_count: self.error_count,
            last_update: self.last_update,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only projection of the capture counters.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub frame_count: u64,
    pub error_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<Arc<DriverError>>,
}

impl StoreStats {
    /// Display text of the last recorded error
    pub fn last_error_text(&self) -> Option<String> {
        self.last_error.as_ref().map(|err| err.to_string())
    }
}

/// Anything a distributor can pull the latest frame from.
pub trait FrameSource: Send + Sync + 'static {
    /// Snapshot of the current frame, if capture has produced one.
    fn latest(&self) -> Option<Frame>;
}

/// Concurrency-safe holder of the most recent frame plus capture statistics.
#[derive(Debug, Clone)]
pub struct FrameStore {
    state: Arc<watch::Sender<StoreState>>,
}

impl FrameStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StoreState::default());
        Self { state: Arc::new(tx) }
    }

    /// Replace the current frame. Returns the sequence number assigned to it.
    pub fn publish(&self, captured: CapturedFrame) -> u64 {
        let mut sequence = 0;
        self.state.send_modify(|state| {
            state.frame_count += 1;
            sequence = state.frame_count;
            state.current = Some(Frame {
                data: captured.data,
                sequence,
                captured_at: captured.captured_at,
                format: captured.format,
            });
            state.last_update = Some(Utc::now());
        });
        trace!(sequence, "Frame published");
        sequence
    }

    /// Record a transient capture failure. The current frame is left untouched.
    pub fn publish_error(&self, error: DriverError) {
        self.state.send_modify(|state| {
            state.error_count += 1;
            state.last_error = Some(Arc::new(error));
        });
    }

    /// Snapshot of the current frame
    pub fn latest(&self) -> Option<Frame> {
        self.state.borrow().current.clone()
    }

    /// Consistent snapshot of the counters
    pub fn stats(&self) -> StoreStats {
        self.state.borrow().stats()
    }

    /// Drop the current frame. Counters are kept.
    pub fn clear_frame(&self) {
        self.state.send_if_modified(|state| state.current.take().is_some());
    }

    /// Subscribe to every state change
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Wait until a frame newer than `after` is published.
    pub async fn next_frame_after(&self, after: u64, timeout: Duration) -> Result<Frame> {
        let mut rx = self.state.subscribe();
        let wait = rx.wait_for(|state| state.current.as_ref().is_some_and(|f| f.sequence > after));
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => state.current.clone().ok_or(DriverError::NoFrame),
            Ok(Err(_)) => Err(DriverError::NoFrame),
            Err(_) => Err(DriverError::Timeout { duration: timeout }),
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FrameStore {
    fn latest(&self) -> Option<Frame> {
        FrameStore::latest(self)
    }
}
