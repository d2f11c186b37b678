//! Control command listener

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::Bus;
use super::envelope::{ControlCommand, ControlPayload, Envelope, schema, subject};
use crate::capture::CaptureWorker;
use crate::{DriverError, Result};

/// Applies `control/1.0` commands from the bus to the capture worker.
pub struct CommandListener {
    bus: Arc<dyn Bus>,
    node_id: String,
    worker: Arc<CaptureWorker>,
    snapshot: Arc<Notify>,
}

impl CommandListener {
    pub fn new(
        bus: Arc<dyn Bus>,
        node_id: impl Into<String>,
        worker: Arc<CaptureWorker>,
        snapshot: Arc<Notify>,
    ) -> Self {
        Self { bus, node_id: node_id.into(), worker, snapshot }
    }

    /// Subscribe and handle commands until cancelled or the subscription ends
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let subject = subject::command(&self.node_id);
        let mut messages = self.bus.subscribe(&subject).await?;
        info!(%subject, "Subscribed to camera commands");

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = messages.next() => match msg {
                    Some(raw) => raw,
                    None => {
                        debug!("Command subscription ended");
                        break;
                    }
                },
            };
            self.handle(&raw).await;
        }
        Ok(())
    }

    /// Handle one raw bus message. Returns the command that was applied, if any.
    pub async fn handle(&self, raw: &[u8]) -> Option<ControlCommand> {
        let envelope: Envelope<serde_json::Value> = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to parse HAL message: {}", e);
                return None;
            }
        };
        if envelope.schema != schema::CONTROL {
            warn!(schema = %envelope.schema, "Unknown command schema");
            return None;
        }
        let payload: ControlPayload = match serde_json::from_value(envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(from = %envelope.device_id, "Malformed control payload: {}", e);
                return None;
            }
        };

        info!(command = ?payload.command, from = %envelope.device_id, "Control command received");
        match payload.command {
            ControlCommand::Start => match self.worker.start().await {
                Ok(()) => {}
                Err(DriverError::AlreadyRunning) => debug!("Capture already running"),
                Err(e) => error!("Failed to start capture: {}", e),
            },
            ControlCommand::Stop => {
                if let Err(e) = self.worker.stop().await {
                    error!("Failed to stop capture: {}", e);
                }
            }
            ControlCommand::Snapshot => self.snapshot.notify_one(),
            ControlCommand::Configure => {
                warn!(params = ?payload.params, "Runtime reconfiguration is not supported; restart with a new config");
                return None;
            }
            ControlCommand::Unknown => {
                warn!("Unknown control command");
                return None;
            }
        }
        Some(payload.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturePhase;
    use crate::hal::bus::LocalBus;
    use crate::store::FrameStore;
    use crate::test_utils::ScriptedBackend;
    use bytes::Bytes;
    use std::time::Duration;

    fn listener() -> (CommandListener, Arc<CaptureWorker>, Arc<Notify>) {
        let worker = Arc::new(CaptureWorker::new(Box::new(ScriptedBackend::new(vec![])), FrameStore::new()));
        let snapshot = Arc::new(Notify::new());
        let bus = Arc::new(LocalBus::default());
        (CommandListener::new(bus, "camera-test", Arc::clone(&worker), Arc::clone(&snapshot)), worker, snapshot)
    }

    fn command(schema: &str, command: &str) -> Vec<u8> {
        let envelope = Envelope::new(schema, "ops-console", serde_json::json!({ "command": command }));
        serde_json::to_vec(&envelope).unwrap()
    }

    #[tokio::test]
    async fn start_and_stop_drive_the_worker() {
        let (listener, worker, _) = listener();

        assert_eq!(listener.handle(&command(schema::CONTROL, "start")).await, Some(ControlCommand::Start));
        assert!(worker.is_running());

        // Repeated start is tolerated
        assert_eq!(listener.handle(&command(schema::CONTROL, "start")).await, Some(ControlCommand::Start));

        assert_eq!(listener.handle(&command(schema::CONTROL, "stop")).await, Some(ControlCommand::Stop));
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn ignores_foreign_schemas_and_garbage() {
        let (listener, worker, _) = listener();

        assert_eq!(listener.handle(&command(schema::STATUS, "start")).await, None);
        assert_eq!(listener.handle(b"not json").await, None);
        assert_eq!(listener.handle(&command(schema::CONTROL, "zoom")).await, None);
        assert_eq!(listener.handle(&command(schema::CONTROL, "configure")).await, None);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn snapshot_notifies_publisher() {
        let (listener, _, snapshot) = listener();

        listener.handle(&command(schema::CONTROL, "snapshot")).await;
        tokio::time::timeout(Duration::from_secs(1), snapshot.notified()).await.unwrap();
    }

    #[tokio::test]
    async fn run_consumes_bus_commands() {
        let bus = LocalBus::default();
        let worker = Arc::new(CaptureWorker::new(Box::new(ScriptedBackend::new(vec![])), FrameStore::new()));
        let listener = CommandListener::new(Arc::new(bus.clone()), "camera-test", Arc::clone(&worker), Arc::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(cancel.clone()));

        let mut phase = worker.subscribe_phase();
        // Retry until the listener has subscribed
        let started = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                bus.publish(&subject::command("camera-test"), Bytes::from(command(schema::CONTROL, "start")))
                    .await
                    .unwrap();
                let capturing = phase.wait_for(|p| *p == CapturePhase::Capturing);
                if tokio::time::timeout(Duration::from_millis(50), capturing).await.is_ok() {
                    break;
                }
            }
        })
        .await;
        assert!(started.is_ok());

        cancel.cancel();
        task.await.unwrap().unwrap();
        worker.stop().await.unwrap();
    }
}
