//! HTTP surface: MJPEG stream, snapshot, push socket, signaling socket, status and info.

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::capture::CaptureWorker;
use crate::config::{Config, ServerConfig};
use crate::session::SessionManager;
use crate::store::FrameStore;
use crate::types::{FrameRate, FrameSize, PixelFormat};

mod handlers;
mod socket;

/// What the HTTP surface reports about the camera
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub device: String,
    pub node_id: String,
    pub size: FrameSize,
    pub format: PixelFormat,
    pub rate: FrameRate,
}

impl CameraInfo {
    pub fn from_config(config: &Config, size: FrameSize) -> Self {
        Self {
            device: config.device.clone(),
            node_id: config.node.id.clone(),
            size,
            format: config.camera.format,
            rate: FrameRate::new(config.camera.fps),
        }
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: FrameStore,
    pub worker: Arc<CaptureWorker>,
    /// `None` when the real-time transport is disabled or unavailable
    pub sessions: Option<SessionManager>,
    pub camera: Arc<CameraInfo>,
    pub server: Arc<ServerConfig>,
    /// Ends streaming bodies and sockets on shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        worker: Arc<CaptureWorker>,
        sessions: Option<SessionManager>,
        camera: CameraInfo,
        server: ServerConfig,
    ) -> Self {
        Self {
            store: worker.store().clone(),
            worker,
            sessions,
            camera: Arc::new(camera),
            server: Arc::new(server),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build the router with every endpoint and the CORS layer
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.server);
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/info", get(handlers::info))
        .route("/stream", get(handlers::stream))
        .route("/snapshot", get(handlers::snapshot))
        .route("/ws", get(handlers::push_socket))
        .route("/webrtc", get(handlers::signaling_socket))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match server.allowed_origins() {
        None => layer.allow_origin(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(%origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }
}

/// Serve until `state.shutdown` is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
