//! Production transport on the `webrtc` crate.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{
    ConnectionState, IceCandidateInit, IceServer, MediaTrack, PeerConnection, SdpType, SessionDescription,
    StateCallback, TransferStats, Transport, TransportError,
};

const TRACK_ID: &str = "video";
const STREAM_ID: &str = "tafy-camera";

/// Shared sample track written by the feeder and bound into every connection.
pub struct WebRtcTrack {
    inner: Arc<TrackLocalStaticSample>,
}

impl WebRtcTrack {
    fn new() -> Self {
        let codec = RTCRtpCodecCapability { mime_type: MIME_TYPE_H264.to_owned(), ..Default::default() };
        Self { inner: Arc::new(TrackLocalStaticSample::new(codec, TRACK_ID.to_owned(), STREAM_ID.to_owned())) }
    }
}

#[async_trait]
impl MediaTrack for WebRtcTrack {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), TransportError> {
        let sample = Sample { data, duration, ..Default::default() };
        self.inner.write_sample(&sample).await.map_err(map_write_error)
    }
}

fn map_write_error(e: webrtc::Error) -> TransportError {
    match e {
        webrtc::Error::ErrClosedPipe => TransportError::ClosedPipe,
        e => TransportError::failed("write_sample", e),
    }
}

/// Transport backed by a shared `webrtc` API instance.
pub struct WebRtcTransport {
    api: API,
    track: Arc<WebRtcTrack>,
}

impl WebRtcTransport {
    /// Build the API with the default codec set and interceptors
    pub fn new() -> Result<Self, TransportError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(|e| TransportError::failed("register_codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| TransportError::failed("register_interceptors", e))?;

        let api = APIBuilder::new().with_media_engine(media).with_interceptor_registry(registry).build();
        Ok(Self { api, track: Arc::new(WebRtcTrack::new()) })
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn new_connection(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerConnection>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let inner = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| TransportError::failed("new_peer_connection", e))?;

        Ok(Arc::new(WebRtcConnection { inner: Arc::new(inner), track: Arc::clone(&self.track) }))
    }

    fn outbound_track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }
}

/// One `RTCPeerConnection`.
///
/// Connections from a [`WebRtcTransport`] always bind that transport's shared track.
pub struct WebRtcConnection {
    inner: Arc<RTCPeerConnection>,
    track: Arc<WebRtcTrack>,
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_outbound_track(&self) -> Result<(), TransportError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = self.track.inner.clone();
        let sender = self.inner.add_track(local).await.map_err(|e| TransportError::failed("add_track", e))?;

        // RTCP has to be drained for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            trace!("RTCP reader finished");
        });
        Ok(())
    }

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(offer)?;
        self.inner.set_remote_description(desc).await.map_err(|e| TransportError::failed("set_remote_description", e))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.inner.create_answer(None).await.map_err(|e| TransportError::failed("create_answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(answer)?;
        self.inner.set_local_description(desc).await.map_err(|e| TransportError::failed("set_local_description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.inner.add_ice_candidate(init).await.map_err(|e| TransportError::failed("add_ice_candidate", e))
    }

    fn on_connection_state_change(&self, callback: StateCallback) {
        self.inner.on_peer_connection_state_change(Box::new(move |state| {
            debug!(?state, "Peer connection state");
            callback(from_rtc_state(state));
            Box::pin(async {})
        }));
    }

    fn connection_state(&self) -> ConnectionState {
        from_rtc_state(self.inner.connection_state())
    }

    async fn transfer_stats(&self) -> Option<TransferStats> {
        let report = self.inner.get_stats().await;
        report.reports.values().find_map(|stats| match stats {
            StatsReportType::Transport(transport) => Some(TransferStats {
                bytes_sent: transport.bytes_sent as u64,
                bytes_received: transport.bytes_received as u64,
            }),
            _ => None,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await.map_err(|e| TransportError::failed("close", e))
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let converted = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            return Ok(rollback);
        }
    };
    converted.map_err(|e| TransportError::failed("parse_sdp", e))
}

fn from_rtc_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}
