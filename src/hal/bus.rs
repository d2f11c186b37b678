//! Message bus capability and the in-process implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::Result;

pub type MessageStream = BoxStream<'static, Bytes>;

/// Publish/subscribe transport for HAL envelopes.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Messages published on `subject` from now on
    async fn subscribe(&self, subject: &str) -> Result<MessageStream>;
}

/// Broadcast bus inside one process.
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<(String, Bytes)>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        // No subscribers is not an error on a bus
        let _ = self.tx.send((subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream> {
        let subject = subject.to_string();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |msg| {
            let matched = match msg {
                Ok((s, payload)) if s == subject => Some(payload),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(subject = %subject, "Bus subscriber lagged, {} messages dropped", n);
                    None
                }
            };
            futures::future::ready(matched)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_only_matching_subject() {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe("a").await.unwrap();

        bus.publish("b", Bytes::from_static(b"ignored")).await.unwrap();
        bus.publish("a", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(sub.next().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = LocalBus::new(4);
        bus.publish("a", Bytes::from_static(b"x")).await.unwrap();
    }
}
