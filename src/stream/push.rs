//! Push-based per-connection distributor (WebSocket)

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tracing::{debug, trace};

use super::ticker::pacing_interval;
use crate::store::FrameSource;
use crate::types::FrameRate;

/// Inbound message from a push client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Why a push session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEnd {
    /// Outbound send failed, connection presumed dead
    SendFailed,
    /// Client sent a close frame or the inbound stream ended
    ClientClosed,
    /// Reading from the client failed
    ReceiveFailed,
}

/// Serve one push client until either direction fails.
///
/// The timer-driven send loop and the receive loop are independent futures, so a client
/// that never reads cannot stall inbound handling and a silent client cannot stall sends.
pub async fn run<S, Tx, Rx, E>(source: S, rate: FrameRate, mut sink: Tx, mut events: Rx) -> PushEnd
where
    S: FrameSource,
    Tx: Sink<Bytes> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<ClientEvent, E>> + Unpin,
    E: Display,
{
    let send_loop = async {
        let mut ticker = pacing_interval(rate.period());
        let mut last_sequence = 0u64;
        loop {
            ticker.tick().await;
            let Some(frame) = source.latest() else { continue };
            if frame.sequence < last_sequence {
                continue;
            }
            last_sequence = frame.sequence;
            if let Err(e) = sink.send(frame.data).await {
                debug!("Failed to send frame via WebSocket: {}", e);
                return PushEnd::SendFailed;
            }
        }
    };

    let recv_loop = async {
        while let Some(event) = events.next().await {
            match event {
                Ok(ClientEvent::Text(text)) => handle_control(&text),
                Ok(ClientEvent::Binary(data)) => trace!(len = data.len(), "Ignoring binary client message"),
                Ok(ClientEvent::Close) => return PushEnd::ClientClosed,
                Err(e) => {
                    debug!("WebSocket receive failed: {}", e);
                    return PushEnd::ReceiveFailed;
                }
            }
        }
        PushEnd::ClientClosed
    };

    tokio::select! {
        end = send_loop => end,
        end = recv_loop => end,
    }
}

/// Control messages are logged; they do not alter the stream.
fn handle_control(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(cmd) => debug!(%cmd, "Received WebSocket command"),
        Err(e) => debug!("Ignoring malformed WebSocket command: {}", e),
    }
}
