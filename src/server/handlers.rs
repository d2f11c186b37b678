use axum::Json;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use super::{AppState, socket};
use crate::capture::CapturePhase;
use crate::session::{PeerId, SessionStats, signaling};
use crate::stream::{multipart, push};

/// Client address for logging, or `unknown` when the server was not built with connect info
pub struct Remote(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Remote {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Remote(remote))
    }
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub phase: CapturePhase,
    pub frame_count: u64,
    pub error_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub fps: u32,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc: Option<SessionStats>,
}

/// GET /api/v1/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.store.stats();
    let webrtc = match &state.sessions {
        Some(sessions) => Some(sessions.stats().await),
        None => None,
    };

    Json(StatusResponse {
        running: state.worker.is_running(),
        phase: state.worker.phase(),
        frame_count: stats.frame_count,
        error_count: stats.error_count,
        last_update: stats.last_update,
        fps: state.camera.rate.fps(),
        last_error: stats.last_error_text(),
        webrtc,
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub device: String,
    pub node_id: String,
    pub resolution: String,
    pub format: String,
    pub fps: u32,
    pub stream_url: String,
    pub snapshot_url: String,
    pub ws_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc_url: Option<String>,
}

/// GET /api/v1/info
pub async fn info(State(state): State<AppState>, headers: HeaderMap) -> Json<InfoResponse> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| format!("localhost:{}", state.server.http_port));

    let camera = &state.camera;
    Json(InfoResponse {
        device: camera.device.clone(),
        node_id: camera.node_id.clone(),
        resolution: camera.size.to_string(),
        format: camera.format.to_string(),
        fps: camera.rate.fps(),
        stream_url: format!("http://{host}/stream"),
        snapshot_url: format!("http://{host}/snapshot"),
        ws_url: format!("ws://{host}/ws"),
        webrtc_url: state.sessions.as_ref().map(|_| format!("ws://{host}/webrtc")),
    })
}

/// GET /snapshot
pub async fn snapshot(State(state): State<AppState>) -> Response {
    let Some(frame) = state.store.latest() else {
        let reason = state.store.stats().last_error_text().unwrap_or_else(|| "no frame available".to_string());
        return (StatusCode::SERVICE_UNAVAILABLE, reason).into_response();
    };

    (
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, frame.len().to_string()),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate".to_string()),
        ],
        frame.data,
    )
        .into_response()
}

/// GET /stream
pub async fn stream(State(state): State<AppState>, Remote(remote): Remote) -> Response {
    let parts = multipart::spawn(state.store.clone(), state.camera.rate, remote)
        .take_until(state.shutdown.clone().cancelled_owned());

    (
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "close"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

fn origin_rejected(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let origin = headers.get(header::ORIGIN)?.to_str().unwrap_or_default();
    if state.server.origin_allowed(origin) {
        return None;
    }
    warn!(%origin, "Rejected WebSocket upgrade from disallowed origin");
    Some((StatusCode::FORBIDDEN, "origin not allowed").into_response())
}

/// GET /ws
pub async fn push_socket(
    State(state): State<AppState>,
    Remote(remote): Remote,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(rejected) = origin_rejected(&state, &headers) {
        return rejected;
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        info!(%remote, "New WebSocket client");
        let (sink, events) = socket::split(socket);
        tokio::select! {
            end = push::run(state.store.clone(), state.camera.rate, socket::binary_sink(sink), events) => {
                debug!(%remote, ?end, "WebSocket session ended");
            }
            _ = state.shutdown.cancelled() => {}
        }
        info!(%remote, "WebSocket client disconnected");
    })
}

/// GET /webrtc
pub async fn signaling_socket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(sessions) = state.sessions.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "WebRTC is not available").into_response();
    };
    if let Some(rejected) = origin_rejected(&state, &headers) {
        return rejected;
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let (sink, events) = socket::split(socket);
        let peer_id = PeerId::generate();
        tokio::select! {
            _ = signaling::run(sessions.clone(), peer_id.clone(), socket::text_sink(sink), events) => {}
            _ = state.shutdown.cancelled() => sessions.remove_peer(&peer_id).await,
        }
    })
}
