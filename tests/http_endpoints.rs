//! End-to-end tests of the HTTP surface driven by the replay backend

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use camera_driver::backends::ReplayBackend;
use camera_driver::config::ServerConfig;
use camera_driver::server::{self, AppState, CameraInfo};
use camera_driver::stream::multipart;
use camera_driver::{CaptureFormat, CaptureWorker, FrameRate, FrameStore, PixelFormat};
use http_body_util::BodyExt;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    _dir: TempDir,
    worker: Arc<CaptureWorker>,
    router: Router,
}

fn write_frames(dir: &TempDir, count: u8) {
    for i in 0..count {
        let pixels: Vec<u8> = std::iter::repeat_n([i * 40, 128, 255 - i * 40], 16 * 16).flatten().collect();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 80).encode(&pixels, 16, 16, ExtendedColorType::Rgb8).unwrap();
        std::fs::write(dir.path().join(format!("frame-{i:03}.jpg")), jpeg).unwrap();
    }
}

async fn harness(server: ServerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    write_frames(&dir, 3);

    let backend = ReplayBackend::open(dir.path()).unwrap();
    let worker = CaptureWorker::new(Box::new(backend), FrameStore::new());
    let size = worker
        .configure(CaptureFormat { width: 16, height: 16, fps: 30, pixel_format: PixelFormat::Mjpeg })
        .await
        .unwrap();
    let worker = Arc::new(worker);

    let camera = CameraInfo {
        device: dir.path().display().to_string(),
        node_id: "camera-test".to_string(),
        size,
        format: PixelFormat::Mjpeg,
        rate: FrameRate::new(10),
    };
    let router = server::router(AppState::new(Arc::clone(&worker), None, camera, server));
    Harness { _dir: dir, worker, router }
}

async fn started(server: ServerConfig) -> Harness {
    let harness = harness(server).await;
    harness.worker.start().await.unwrap();
    harness.worker.store().next_frame_after(0, Duration::from_secs(2)).await.unwrap();
    harness
}

async fn get(router: &Router, uri: &str, headers: &[(header::HeaderName, &str)]) -> axum::response::Response {
    let mut request = Request::get(uri);
    for (name, value) in headers {
        request = request.header(name, *value);
    }
    router.clone().oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let harness = harness(ServerConfig::default()).await;
    let response = get(&harness.router, "/health", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn snapshot_unavailable_before_capture() {
    let harness = harness(ServerConfig::default()).await;
    let response = get(&harness.router, "/snapshot", &[]).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"no frame available");
}

#[tokio::test]
async fn snapshot_serves_latest_jpeg() {
    let harness = started(ServerConfig::default()).await;
    let response = get(&harness.router, "/snapshot", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
    let length: usize = response.headers()[header::CONTENT_LENGTH].to_str().unwrap().parse().unwrap();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), length);
    assert_eq!(&body[..2], &[0xFF, 0xD8]);

    harness.worker.stop().await.unwrap();
}

#[tokio::test]
async fn status_reports_capture_counters() {
    let harness = started(ServerConfig::default()).await;
    let status = json(get(&harness.router, "/api/v1/status", &[]).await).await;

    assert_eq!(status["running"], true);
    assert_eq!(status["phase"], "capturing");
    assert!(status["frame_count"].as_u64().unwrap() >= 1);
    assert_eq!(status["error_count"], 0);
    assert_eq!(status["fps"], 10);
    assert!(status["last_update"].is_string());
    assert!(status["last_error"].is_null());
    assert!(status.get("webrtc").is_none());

    harness.worker.stop().await.unwrap();
    let status = json(get(&harness.router, "/api/v1/status", &[]).await).await;
    assert_eq!(status["running"], false);
}

#[tokio::test]
async fn info_derives_urls_from_host() {
    let harness = harness(ServerConfig::default()).await;
    let info = json(get(&harness.router, "/api/v1/info", &[(header::HOST, "cam.local:8080")]).await).await;

    assert_eq!(info["node_id"], "camera-test");
    assert_eq!(info["resolution"], "16x16");
    assert_eq!(info["format"], "MJPEG");
    assert_eq!(info["stream_url"], "http://cam.local:8080/stream");
    assert_eq!(info["ws_url"], "ws://cam.local:8080/ws");
    assert!(info.get("webrtc_url").is_none());
}

#[tokio::test]
async fn stream_emits_delimited_parts() {
    let harness = started(ServerConfig::default()).await;
    let response = get(&harness.router, "/stream", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], multipart::CONTENT_TYPE);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(response.headers()[header::PRAGMA], "no-cache");

    let mut body = response.into_body();
    let part = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .into_data()
        .unwrap();

    let header_end = part.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = std::str::from_utf8(&part[..header_end]).unwrap();
    assert!(head.starts_with("\r\n--frame\r\nContent-Type: image/jpeg\r\nContent-Length: "));
    let length: usize = head.trim().rsplit(' ').next().unwrap().parse().unwrap();
    assert_eq!(part.len() - header_end, length);

    drop(body);
    harness.worker.stop().await.unwrap();
}

#[tokio::test]
async fn signaling_unavailable_without_transport() {
    let harness = harness(ServerConfig::default()).await;
    let response = get(&harness.router, "/webrtc", &[]).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn websocket_upgrade_enforces_origin() {
    let server = ServerConfig { cors_origins: "http://console.local".to_string(), ..ServerConfig::default() };
    let harness = harness(server).await;

    let response = get(&harness.router, "/ws", &[(header::ORIGIN, "http://evil.local")]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Allowed origin gets past the check and fails only on the missing upgrade headers
    let response = get(&harness.router, "/ws", &[(header::ORIGIN, "http://console.local")]).await;
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn cors_headers_follow_allowed_origins() {
    let server = ServerConfig { cors_origins: "http://console.local".to_string(), ..ServerConfig::default() };
    let harness = harness(server).await;

    let allowed = get(&harness.router, "/health", &[(header::ORIGIN, "http://console.local")]).await;
    assert_eq!(allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://console.local");

    let denied = get(&harness.router, "/health", &[(header::ORIGIN, "http://evil.local")]).await;
    assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
