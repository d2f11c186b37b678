//! Real-time transport capability.
//!
//! The session manager negotiates peers through these traits and the sample feeder pushes
//! media through [`MediaTrack`]. Packetization, codecs and NAT traversal live behind them;
//! the `webrtc` feature provides the production implementation in [`webrtc`](self::webrtc).

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "webrtc")]
pub mod webrtc;

/// Errors reported by the transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The outbound pipe has no live receiver, an expected race with peer disconnects
    #[error("Transport pipe closed")]
    ClosedPipe,

    #[error("Transport {operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

impl TransportError {
    pub fn failed(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        TransportError::Failed { operation: operation.into(), reason: reason.to_string() }
    }

    pub fn is_closed_pipe(&self) -> bool {
        matches!(self, TransportError::ClosedPipe)
    }
}

/// Connection state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the connection will not recover
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// SDP type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// ICE candidate in its browser JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Callback invoked on every connection state change
pub type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Outbound media channel shared by every peer.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    /// Write one media sample lasting `duration`
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), TransportError>;
}

/// Bytes moved over one connection since it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransferStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One negotiated transport connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Bind the creating transport's [`Transport::outbound_track`] to this connection
    async fn add_outbound_track(&self) -> Result<(), TransportError>;

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), TransportError>;

    /// Register the state callback. Replaces any earlier callback.
    fn on_connection_state_change(&self, callback: StateCallback);

    fn connection_state(&self) -> ConnectionState;

    /// Transfer counters, for transports that report them
    async fn transfer_stats(&self) -> Option<TransferStats> {
        None
    }

    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for transport connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn new_connection(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerConnection>, TransportError>;

    /// The single outbound track every connection binds to
    fn outbound_track(&self) -> Arc<dyn MediaTrack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 UDP 2122252543 192.168.1.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidateInit = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());

        let back = serde_json::to_value(&candidate).unwrap();
        assert_eq!(back["sdpMLineIndex"], 0);
        assert!(back.get("usernameFragment").is_none());
    }

    #[test]
    fn session_description_uses_type_tag() {
        let desc: SessionDescription = serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(desc, SessionDescription::offer("v=0"));
        let json = serde_json::to_string(&SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"answer","sdp":"v=0"}"#);
    }

    #[test]
    fn closed_pipe_is_distinguished() {
        assert!(TransportError::ClosedPipe.is_closed_pipe());
        assert!(!TransportError::failed("write_sample", "boom").is_closed_pipe());
    }
}
