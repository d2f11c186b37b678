//! Peer session state

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::transport::{ConnectionState, PeerConnection};

/// Opaque per-connection-attempt peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Allocate a fresh id
    pub fn generate() -> Self {
        Self(format!("peer-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signaling state machine for one peer.
///
/// `New -> OfferReceived -> AnswerSent -> Connected -> {Disconnected, Failed} -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    New,
    OfferReceived,
    AnswerSent,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Next state after the transport reports `state`
    pub fn on_connection_state(self, state: ConnectionState) -> PeerState {
        match state {
            ConnectionState::Connected => PeerState::Connected,
            ConnectionState::Disconnected => PeerState::Disconnected,
            ConnectionState::Failed => PeerState::Failed,
            ConnectionState::Closed => PeerState::Closed,
            ConnectionState::New | ConnectionState::Connecting => self,
        }
    }

    /// States that trigger removal from the peer map
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Disconnected | PeerState::Failed | PeerState::Closed)
    }
}

/// A negotiated peer, owned by the session manager's registry.
pub(crate) struct PeerSession {
    pub id: PeerId,
    pub state: PeerState,
    /// Distinguishes renegotiated connections for the same peer id
    pub generation: u64,
    pub connection: Arc<dyn PeerConnection>,
    pub created_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            state: self.state,
            connection_state: self.connection.connection_state(),
            created_at: self.created_at,
            bytes_sent: None,
            bytes_received: None,
        }
    }
}

/// Read-only view of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub state: PeerState,
    pub connection_state: ConnectionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<u64>,
}

/// Read-only projection of the peer map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub peer_count: usize,
    pub peers: Vec<PeerInfo>,
}

impl SessionStats {
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.iter().any(|peer| &peer.id == id)
    }
}
