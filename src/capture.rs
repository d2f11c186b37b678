//! Capture worker that drives a backend and feeds the frame store

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::{CaptureBackend, CaptureFormat, WaitResult};
use crate::codec::{FrameConverter, RejectConverter};
use crate::store::FrameStore;
use crate::types::{CapturedFrame, FrameSize, PixelFormat};
use crate::{DriverError, Result};

/// Default bounded wait for one frame
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the capture worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    Idle,
    Starting,
    Capturing,
    Stopping,
}

type Backend = Box<dyn CaptureBackend>;

enum Slot {
    /// Backend parked, no loop running
    Idle(Backend),
    /// Loop owns the backend and hands it back on exit
    Running { cancel: CancellationToken, handle: JoinHandle<(Backend, Result<()>)> },
    /// Backend lost to a panicked task
    Vacant,
}

/// Drives one capture backend and publishes accepted frames into a [`FrameStore`].
///
/// Exactly one loop runs per worker. [`start`](Self::start) fails with
/// [`DriverError::AlreadyRunning`] unless the worker is idle, and [`stop`](Self::stop) returns
/// only after the loop has exited and the backend has been stopped.
pub struct CaptureWorker {
    store: FrameStore,
    converter: Arc<dyn FrameConverter>,
    frame_timeout: Duration,
    device: String,
    slot: Mutex<Slot>,
    phase: watch::Sender<CapturePhase>,
    shutdown: CancellationToken,
}

impl CaptureWorker {
    /// Create an idle worker around an opened backend
    pub fn new(backend: Backend, store: FrameStore) -> Self {
        let device = backend.describe();
        let (phase, _) = watch::channel(CapturePhase::Idle);
        Self {
            store,
            converter: Arc::new(RejectConverter),
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            device,
            slot: Mutex::new(Slot::Idle(backend)),
            phase,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the bounded wait used for each frame
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the converter used for non-JPEG payloads
    pub fn with_converter(mut self, converter: Arc<dyn FrameConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Backend description
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn phase(&self) -> CapturePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CapturePhase> {
        self.phase.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == CapturePhase::Capturing
    }

    /// Apply a capture format. Only allowed while idle.
    pub async fn configure(&self, format: CaptureFormat) -> Result<FrameSize> {
        let mut slot = self.slot.lock().await;
        let mut backend = match std::mem::replace(&mut *slot, Slot::Vacant) {
            Slot::Idle(backend) => backend,
            other => {
                let err = Self::not_idle(&other);
                *slot = other;
                return Err(err);
            }
        };

        let (backend, result) = tokio::task::spawn_blocking(move || {
            let result = backend.configure(&format);
            (backend, result)
        })
        .await
        .map_err(|e| DriverError::device_error_with_source("configure", e))?;

        *slot = Slot::Idle(backend);
        let size = result?;
        info!(device = %self.device, "Capture configured: {} {} @ {}fps", size, format.pixel_format, format.fps);
        Ok(size)
    }

    /// Start the capture loop.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let mut backend = match std::mem::replace(&mut *slot, Slot::Vacant) {
            Slot::Idle(backend) => backend,
            other => {
                let err = Self::not_idle(&other);
                *slot = other;
                return Err(err);
            }
        };

        self.phase.send_replace(CapturePhase::Starting);
        let started = tokio::task::spawn_blocking(move || {
            let result = backend.start();
            (backend, result)
        })
        .await;

        let backend = match started {
            Ok((backend, Ok(()))) => backend,
            Ok((backend, Err(e))) => {
                *slot = Slot::Idle(backend);
                self.phase.send_replace(CapturePhase::Idle);
                return Err(e);
            }
            Err(e) => {
                self.phase.send_replace(CapturePhase::Idle);
                return Err(DriverError::device_error_with_source("start", e));
            }
        };

        let cancel = self.shutdown.child_token();
        let capture = CaptureLoop {
            store: self.store.clone(),
            converter: Arc::clone(&self.converter),
            timeout: self.frame_timeout,
            cancel: cancel.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || capture.run(backend));

        *slot = Slot::Running { cancel, handle };
        self.phase.send_replace(CapturePhase::Capturing);
        info!(device = %self.device, "Capture started");
        Ok(())
    }

    /// Stop the capture loop. A no-op when idle.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let (cancel, handle) = match std::mem::replace(&mut *slot, Slot::Vacant) {
            Slot::Running { cancel, handle } => (cancel, handle),
            other => {
                *slot = other;
                return Ok(());
            }
        };

        self.phase.send_replace(CapturePhase::Stopping);
        cancel.cancel();
        let joined = handle.await;
        self.store.clear_frame();
        self.phase.send_replace(CapturePhase::Idle);

        match joined {
            Ok((backend, result)) => {
                *slot = Slot::Idle(backend);
                info!(device = %self.device, "Capture stopped");
                result
            }
            Err(e) => Err(DriverError::device_error_with_source("capture loop", e)),
        }
    }

    fn not_idle(slot: &Slot) -> DriverError {
        match slot {
            Slot::Running { .. } => DriverError::AlreadyRunning,
            _ => DriverError::device_error("backend unavailable after a failed capture loop"),
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State moved onto the blocking capture thread
struct CaptureLoop {
    store: FrameStore,
    converter: Arc<dyn FrameConverter>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CaptureLoop {
    fn run(self, mut backend: Backend) -> (Backend, Result<()>) {
        debug!("Capture loop started");
        let format = backend.pixel_format();
        let mut published = 0u64;
        let mut consecutive_errors = 0u32;

        while !self.cancel.is_cancelled() {
            let data = match backend.wait_for_frame(self.timeout).and_then(|ready| match ready {
                WaitResult::Ready => backend.read_frame().map(Some),
                WaitResult::Timeout => Ok(None),
            }) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    debug!(timeout = ?self.timeout, "No frame within wait window");
                    continue;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(consecutive_errors, "Capture read error: {}", e);
                    self.store.publish_error(e);
                    self.backoff(consecutive_errors);
                    continue;
                }
            };
            consecutive_errors = 0;
            let captured_at = Instant::now();

            if data.is_empty() {
                trace!("Skipping empty payload");
                continue;
            }

            let payload = if format.is_jpeg() {
                data
            } else {
                match self.converter.convert(&data, format) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        debug!("Dropping {} frame: {}", format, e);
                        self.store.publish_error(e);
                        continue;
                    }
                }
            };

            self.store.publish(CapturedFrame { data: payload, format: PixelFormat::Mjpeg, captured_at });
            published += 1;
        }

        let result = backend.stop();
        info!("Capture loop ended (published {} frames)", published);
        (backend, result)
    }

    /// Exponential backoff: 50ms, 100ms, 200ms, ... bounded by the frame timeout and cut short
    /// on cancellation.
    fn backoff(&self, consecutive_errors: u32) {
        let backoff = Duration::from_millis(50 * (1 << consecutive_errors.min(5))).min(self.timeout);
        let deadline = Instant::now() + backoff;
        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}
