//! Signaling wire format and the per-connection signaling loop

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info, warn};

use super::SessionManager;
use super::peer::{PeerId, PeerState};
use crate::stream::ClientEvent;
use crate::transport::{IceCandidateInit, SessionDescription};

/// Signaling message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Error,
    #[serde(other)]
    Unknown,
}

/// JSON envelope exchanged over the signaling socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidateInit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignalMessage {
    fn empty(kind: SignalKind) -> Self {
        Self { kind, peer_id: None, offer: None, answer: None, candidate: None, error: None }
    }

    pub fn answer(peer_id: &PeerId, answer: SessionDescription) -> Self {
        Self { peer_id: Some(peer_id.to_string()), answer: Some(answer), ..Self::empty(SignalKind::Answer) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { error: Some(message.into()), ..Self::empty(SignalKind::Error) }
    }
}

/// Serve one signaling connection for `peer_id`.
///
/// Messages are handled strictly in receipt order. When the inbound stream ends, the client
/// closes, or a reply cannot be sent, the peer is removed and its connection closed.
pub async fn run<Tx, Rx, E>(manager: SessionManager, peer_id: PeerId, mut sink: Tx, mut events: Rx)
where
    Tx: Sink<String> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<ClientEvent, E>> + Unpin,
    E: Display,
{
    info!(%peer_id, "New WebRTC peer");
    let mut state = PeerState::New;

    while let Some(event) = events.next().await {
        let text = match event {
            Ok(ClientEvent::Text(text)) => text,
            Ok(ClientEvent::Binary(_)) => continue,
            Ok(ClientEvent::Close) => break,
            Err(e) => {
                debug!(%peer_id, "Signaling receive failed: {}", e);
                break;
            }
        };

        let msg: SignalMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%peer_id, "Malformed signaling message: {}", e);
                let _ = send(&mut sink, &SignalMessage::error(format!("invalid signaling message: {e}"))).await;
                break;
            }
        };

        let reply = match msg.kind {
            SignalKind::Offer => match msg.offer {
                Some(offer) => {
                    let prior = state;
                    state = PeerState::OfferReceived;
                    debug!(%peer_id, ?state, "Offer received");
                    match manager.handle_offer(&peer_id, offer).await {
                        Ok(answer) => {
                            state = PeerState::AnswerSent;
                            debug!(%peer_id, ?state, "Answer created");
                            Some(SignalMessage::answer(&peer_id, answer))
                        }
                        Err(e) => {
                            warn!(%peer_id, "Failed to handle offer: {}", e);
                            state = prior;
                            Some(SignalMessage::error(e.to_string()))
                        }
                    }
                }
                None => Some(SignalMessage::error("offer message without an offer")),
            },
            SignalKind::Candidate => match manager.handle_candidate(&peer_id, msg.candidate).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(%peer_id, "Failed to handle candidate: {}", e);
                    Some(SignalMessage::error(e.to_string()))
                }
            },
            SignalKind::Error => {
                warn!(%peer_id, "Client reported signaling error: {}", msg.error.as_deref().unwrap_or("unknown"));
                None
            }
            SignalKind::Answer | SignalKind::Unknown => {
                debug!(%peer_id, kind = ?msg.kind, "Ignoring signaling message");
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = send(&mut sink, &reply).await {
                debug!(%peer_id, "Failed to send signaling reply: {}", e);
                break;
            }
        }
    }

    manager.remove_peer(&peer_id).await;
    info!(%peer_id, last_state = ?state, "WebRTC peer disconnected");
}

async fn send<Tx>(sink: &mut Tx, msg: &SignalMessage) -> Result<(), String>
where
    Tx: Sink<String> + Unpin,
    Tx::Error: Display,
{
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(text).await.map_err(|e| e.to_string())
}
