//! Periodic status and frame-metadata publishing

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::bus::Bus;
use super::envelope::{CameraStatus, Envelope, FramePayload, StatusPayload, schema, subject};
use crate::capture::CapturePhase;
use crate::store::{FrameStore, StoreState};
use crate::stream::{ThrottleExt, pacing_interval};
use crate::types::{Frame, FrameSize, PixelFormat};
use crate::{DriverError, Result};

/// Static description of the camera carried in every payload
#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    pub camera_id: String,
    pub size: FrameSize,
    pub format: PixelFormat,
    pub fps: u32,
    pub stream_url: String,
}

/// Publishes status every `status_interval` and frame metadata at most once per
/// `frame_period`, and only for frames not yet announced.
pub struct HalPublisher {
    bus: Arc<dyn Bus>,
    node_id: String,
    camera: CameraDescriptor,
    store: FrameStore,
    phase: watch::Receiver<CapturePhase>,
    status_interval: Duration,
    frame_period: Duration,
    snapshot: Arc<Notify>,
}

impl HalPublisher {
    pub fn new(
        bus: Arc<dyn Bus>,
        node_id: impl Into<String>,
        camera: CameraDescriptor,
        store: FrameStore,
        phase: watch::Receiver<CapturePhase>,
    ) -> Self {
        Self {
            bus,
            node_id: node_id.into(),
            camera,
            store,
            phase,
            status_interval: Duration::from_secs(30),
            frame_period: Duration::from_secs(1),
            snapshot: Arc::new(Notify::new()),
        }
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    /// Notifying this publishes the current frame's metadata immediately
    pub fn snapshot_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.snapshot)
    }

    pub fn status_payload(&self) -> StatusPayload {
        let stats = self.store.stats();
        let status = match *self.phase.borrow() {
            CapturePhase::Capturing if self.store.latest().is_some() => CameraStatus::Streaming,
            CapturePhase::Capturing if stats.last_error.is_some() => CameraStatus::Error,
            CapturePhase::Stopping => CameraStatus::Disconnected,
            _ => CameraStatus::Ready,
        };

        StatusPayload {
            camera_id: self.camera.camera_id.clone(),
            status,
            resolution: self.camera.size.to_string(),
            fps: self.camera.fps,
            frame_count: stats.frame_count,
            error_count: stats.error_count,
            last_error: stats.last_error_text(),
            stream_url: self.camera.stream_url.clone(),
        }
    }

    pub fn frame_payload(&self, frame: &Frame, frame_count: u64) -> FramePayload {
        FramePayload {
            camera_id: self.camera.camera_id.clone(),
            resolution: self.camera.size.to_string(),
            format: self.camera.format.to_string(),
            fps: self.camera.fps,
            timestamp: chrono::Utc::now().timestamp_millis(),
            frame_count,
            size: frame.len(),
            url: Some(self.camera.stream_url.clone()),
        }
    }

    pub async fn publish_status(&self) -> Result<()> {
        let payload = self.status_payload();
        trace!(status = ?payload.status, "Publishing camera status");
        self.publish(&subject::status(&self.node_id), schema::STATUS, payload).await
    }

    async fn publish_frame(&self, state: &StoreState) -> Result<bool> {
        let Some(frame) = state.current() else {
            return Ok(false);
        };
        let payload = self.frame_payload(frame, state.frame_count());
        self.publish(&subject::frame(&self.node_id), schema::FRAME, payload).await?;
        Ok(true)
    }

    async fn publish<P: Serialize>(&self, subject: &str, schema: &str, payload: P) -> Result<()> {
        let envelope = Envelope::new(schema, &self.node_id, payload);
        let data = serde_json::to_vec(&envelope).map_err(|e| DriverError::bus("encode", e.to_string()))?;
        self.bus.publish(subject, Bytes::from(data)).await
    }

    /// Publish until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(node_id = %self.node_id, "HAL publisher started");
        let mut status_tick = pacing_interval(self.status_interval);
        let mut frames = std::pin::pin!(WatchStream::new(self.store.subscribe()).throttle(self.frame_period));
        let mut announced = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = status_tick.tick() => {
                    if let Err(e) = self.publish_status().await {
                        warn!("Failed to publish status: {}", e);
                    }
                }
                Some(state) = frames.next() => {
                    if state.frame_count() <= announced {
                        continue;
                    }
                    match self.publish_frame(&state).await {
                        Ok(true) => announced = state.frame_count(),
                        Ok(false) => {}
                        Err(e) => warn!("Failed to publish frame metadata: {}", e),
                    }
                }
                _ = self.snapshot.notified() => {
                    let state = self.store.subscribe().borrow().clone();
                    match self.publish_frame(&state).await {
                        Ok(true) => announced = announced.max(state.frame_count()),
                        Ok(false) => debug!("Snapshot requested with no frame available"),
                        Err(e) => warn!("Failed to publish snapshot metadata: {}", e),
                    }
                }
            }
        }
        info!("HAL publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::bus::LocalBus;
    use crate::types::CapturedFrame;

    fn publisher(bus: &LocalBus, store: &FrameStore, phase: CapturePhase) -> HalPublisher {
        let (_tx, rx) = watch::channel(phase);
        let camera = CameraDescriptor {
            camera_id: "/dev/video0".to_string(),
            size: FrameSize { width: 640, height: 480 },
            format: PixelFormat::Mjpeg,
            fps: 30,
            stream_url: "http://camera-test:8080/stream".to_string(),
        };
        HalPublisher::new(Arc::new(bus.clone()), "camera-test", camera, store.clone(), rx)
            .with_status_interval(Duration::from_secs(30))
            .with_frame_period(Duration::from_millis(100))
    }

    fn frame(byte: u8) -> CapturedFrame {
        CapturedFrame::new(Bytes::from(vec![byte; 16]), PixelFormat::Mjpeg)
    }

    #[test]
    fn status_reflects_phase_and_counts() {
        let bus = LocalBus::default();
        let store = FrameStore::new();

        let idle = publisher(&bus, &store, CapturePhase::Idle).status_payload();
        assert_eq!(idle.status, CameraStatus::Ready);

        store.publish_error(DriverError::device_error("read"));
        let failing = publisher(&bus, &store, CapturePhase::Capturing).status_payload();
        assert_eq!(failing.status, CameraStatus::Error);
        assert_eq!(failing.error_count, 1);
        assert!(failing.last_error.unwrap().contains("read"));

        store.publish(frame(1));
        let streaming = publisher(&bus, &store, CapturePhase::Capturing).status_payload();
        assert_eq!(streaming.status, CameraStatus::Streaming);
        assert_eq!(streaming.frame_count, 1);
        assert_eq!(streaming.resolution, "640x480");
    }

    #[tokio::test(start_paused = true)]
    async fn frame_metadata_only_for_new_frames() {
        let bus = LocalBus::default();
        let store = FrameStore::new();
        let mut frames = bus.subscribe(&subject::frame("camera-test")).await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher(&bus, &store, CapturePhase::Capturing).run(cancel.clone()));

        store.publish(frame(1));
        let msg = tokio::time::timeout(Duration::from_secs(1), frames.next()).await.unwrap().unwrap();
        let envelope: Envelope<FramePayload> = serde_json::from_slice(&msg).unwrap();
        assert_eq!(envelope.schema, schema::FRAME);
        assert_eq!(envelope.device_id, "camera-test");
        assert_eq!(envelope.payload.frame_count, 1);
        assert_eq!(envelope.payload.size, 16);

        // Errors change the store but announce no frame
        store.publish_error(DriverError::device_error("read"));
        assert!(tokio::time::timeout(Duration::from_millis(500), frames.next()).await.is_err());

        for byte in 2..=5 {
            store.publish(frame(byte));
        }
        let msg = tokio::time::timeout(Duration::from_secs(1), frames.next()).await.unwrap().unwrap();
        let envelope: Envelope<FramePayload> = serde_json::from_slice(&msg).unwrap();
        assert_eq!(envelope.payload.frame_count, 5);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_published_on_start_and_interval() {
        let bus = LocalBus::default();
        let store = FrameStore::new();
        let mut statuses = bus.subscribe(&subject::status("camera-test")).await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher(&bus, &store, CapturePhase::Idle).run(cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(1), statuses.next()).await.unwrap().unwrap();
        let envelope: Envelope<StatusPayload> = serde_json::from_slice(&first).unwrap();
        assert_eq!(envelope.schema, schema::STATUS);
        assert_eq!(envelope.payload.stream_url, "http://camera-test:8080/stream");

        assert!(tokio::time::timeout(Duration::from_secs(29), statuses.next()).await.is_err());
        assert!(tokio::time::timeout(Duration::from_secs(2), statuses.next()).await.unwrap().is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_trigger_republishes_current_frame() {
        let bus = LocalBus::default();
        let store = FrameStore::new();
        let mut frames = bus.subscribe(&subject::frame("camera-test")).await.unwrap();
        let publisher = publisher(&bus, &store, CapturePhase::Capturing);
        let trigger = publisher.snapshot_trigger();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));

        store.publish(frame(1));
        tokio::time::timeout(Duration::from_secs(1), frames.next()).await.unwrap().unwrap();

        trigger.notify_one();
        let msg = tokio::time::timeout(Duration::from_secs(1), frames.next()).await.unwrap().unwrap();
        let envelope: Envelope<FramePayload> = serde_json::from_slice(&msg).unwrap();
        assert_eq!(envelope.payload.frame_count, 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
