//! Zenoh-backed bus. HAL subjects map to key expressions by replacing `.` with `/`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};
use zenoh::Session;

use super::bus::{Bus, MessageStream};
use crate::{DriverError, Result};

pub struct ZenohBus {
    session: Session,
}

impl ZenohBus {
    /// Open a session, connecting to `endpoint` when one is given
    pub async fn connect(endpoint: Option<&str>) -> Result<Self> {
        let mut config = zenoh::Config::default();
        if let Some(endpoint) = endpoint {
            config
                .insert_json5("connect/endpoints", &format!("[\"{endpoint}\"]"))
                .map_err(|e| DriverError::bus("configure", e.to_string()))?;
        }

        let session = zenoh::open(config).await.map_err(|e| DriverError::bus("open", e.to_string()))?;
        info!(endpoint = endpoint.unwrap_or("default"), "Connected to zenoh");
        Ok(Self { session })
    }
}

pub fn key_expr(subject: &str) -> String {
    subject.replace('.', "/")
}

#[async_trait]
impl Bus for ZenohBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.session
            .put(key_expr(subject), payload.to_vec())
            .await
            .map_err(|e| DriverError::bus("publish", e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream> {
        let key = key_expr(subject);
        let subscriber = self
            .session
            .declare_subscriber(&key)
            .await
            .map_err(|e| DriverError::bus("subscribe", e.to_string()))?;
        debug!(%key, "Declared zenoh subscriber");

        let stream = futures::stream::unfold(subscriber, |subscriber| async move {
            let sample = subscriber.recv_async().await.ok()?;
            let payload = Bytes::copy_from_slice(&sample.payload().to_bytes());
            Some((payload, subscriber))
        });
        Ok(stream.boxed())
    }
}
