use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camera_driver::backends::open_backend;
use camera_driver::codec::converter_for;
use camera_driver::config::{BusBackend, BusConfig, CliArgs, LogConfig};
use camera_driver::hal::{Bus, CameraDescriptor, CommandListener, HalPublisher, LocalBus};
use camera_driver::server::{self, AppState, CameraInfo};
use camera_driver::stream::feeder;
use camera_driver::{CaptureFormat, CaptureWorker, Config, FrameRate, FrameStore, SessionManager};

const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();
    let config = Config::load(&args).context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!(device = %config.device, node_id = %config.node.id, "Starting camera driver");

    // Capture first: nothing else is useful without a working device
    let backend = open_backend(config.camera.backend, &config.device).context("Failed to open camera")?;
    let worker = CaptureWorker::new(backend, FrameStore::new()).with_frame_timeout(config.capture.frame_timeout());
    let format = CaptureFormat {
        width: config.camera.width,
        height: config.camera.height,
        fps: config.camera.fps,
        pixel_format: config.camera.format,
    };
    let size = worker.configure(format).await.context("Failed to configure camera")?;
    let worker = Arc::new(worker.with_converter(Arc::from(converter_for(
        config.camera.conversion,
        size,
        config.camera.quality,
    ))));
    worker.start().await.context("Failed to start camera capture")?;

    let store = worker.store().clone();
    let rate = FrameRate::new(config.camera.fps);
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let sessions = if config.webrtc.enabled { start_sessions(&config) } else { None };
    if let Some(sessions) = &sessions {
        let track = sessions.outbound_track();
        let peers = sessions.peer_count();
        let cancel = cancel.clone();
        let store = store.clone();
        tasks.spawn(async move { feeder::run(store, track, rate, peers, cancel).await });
    }

    if config.bus.enabled {
        let bus = connect_bus(&config.bus).await.context("Failed to connect to the control bus")?;
        let camera = CameraDescriptor {
            camera_id: config.device.clone(),
            size,
            format: config.camera.format,
            fps: config.camera.fps,
            stream_url: format!("http://{}:{}/stream", advertised_host(), config.server.http_port),
        };
        let publisher =
            HalPublisher::new(Arc::clone(&bus), &config.node.id, camera, store.clone(), worker.subscribe_phase())
                .with_status_interval(config.bus.status_interval())
                .with_frame_period(config.bus.frame_period());
        let commands = CommandListener::new(bus, &config.node.id, Arc::clone(&worker), publisher.snapshot_trigger());

        tasks.spawn(publisher.run(cancel.clone()));
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = commands.run(cancel).await {
                error!("Command listener failed: {}", e);
            }
        });
    }

    let port = config.server.http_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await.with_context(|| format!("Failed to bind port {port}"))?;
    let http_shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::clone(&worker),
        sessions.clone(),
        CameraInfo::from_config(&config, size),
        config.server.clone(),
    )
    .with_shutdown(http_shutdown.clone());
    let mut http = tokio::spawn(server::serve(listener, state));

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        result = &mut http => match result {
            Ok(Ok(())) => warn!("HTTP server exited"),
            Ok(Err(e)) => error!("HTTP server error: {}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        },
    }

    // Background tasks, then HTTP, then peers, then capture
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    http_shutdown.cancel();
    if !http.is_finished() && tokio::time::timeout(HTTP_SHUTDOWN_GRACE, &mut http).await.is_err() {
        warn!("HTTP server did not shut down in time");
        http.abort();
    }

    if let Some(sessions) = sessions {
        sessions.shutdown().await;
    }
    if let Err(e) = worker.stop().await {
        error!("Failed to stop capture: {}", e);
    }
    drop(worker);

    info!("Camera driver stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.pretty {
        builder.pretty().init();
    } else {
        builder.init();
    }
}

#[cfg(feature = "webrtc")]
fn start_sessions(config: &Config) -> Option<SessionManager> {
    match camera_driver::transport::webrtc::WebRtcTransport::new() {
        Ok(transport) => Some(SessionManager::spawn(Arc::new(transport), config.webrtc.ice_servers())),
        Err(e) => {
            warn!("WebRTC unavailable, continuing without it: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "webrtc"))]
fn start_sessions(_config: &Config) -> Option<SessionManager> {
    warn!("WebRTC enabled in config but this build lacks the `webrtc` feature");
    None
}

async fn connect_bus(config: &BusConfig) -> Result<Arc<dyn Bus>> {
    match config.backend {
        BusBackend::Local => Ok(Arc::new(LocalBus::default())),
        BusBackend::Zenoh => zenoh_bus(config).await,
    }
}

#[cfg(feature = "zenoh")]
async fn zenoh_bus(config: &BusConfig) -> Result<Arc<dyn Bus>> {
    let bus = camera_driver::hal::zenoh::ZenohBus::connect(config.endpoint.as_deref()).await?;
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "zenoh"))]
async fn zenoh_bus(_config: &BusConfig) -> Result<Arc<dyn Bus>> {
    Err(camera_driver::DriverError::unsupported("zenoh bus", "the `zenoh` feature").into())
}

fn advertised_host() -> String {
    hostname::get().map(|h| h.to_string_lossy().to_lowercase()).unwrap_or_else(|_| "localhost".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
