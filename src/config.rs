//! Driver configuration.
//!
//! Sources are layered, later ones winning: built-in defaults, a YAML file, `TAFY_CAMERA_*`
//! environment variables, then command-line flags.

use argh::FromArgs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::backends::BackendKind;
use crate::codec::ConversionMode;
use crate::transport::IceServer;
use crate::types::{FrameSize, MAX_FPS, PixelFormat};
use crate::{DriverError, Result};

pub const ENV_PREFIX: &str = "TAFY_CAMERA_";

/// Files tried when no `--config` is given. Missing files are skipped.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["./config/config.yaml", "./config.yaml"];

#[derive(FromArgs, Debug, Default)]
/// USB camera driver: MJPEG, WebSocket and WebRTC streaming with HAL integration
pub struct CliArgs {
    /// config file (default: ./config/config.yaml)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// capture device path
    #[argh(option)]
    pub device: Option<String>,

    /// node id (derived from the hostname if empty)
    #[argh(option)]
    pub node_id: Option<String>,

    /// HTTP server port
    #[argh(option)]
    pub http_port: Option<u16>,

    /// log level (trace, debug, info, warn, error)
    #[argh(option)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: String,
    pub node: NodeConfig,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub webrtc: WebRtcConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            node: NodeConfig::default(),
            camera: CameraConfig::default(),
            capture: CaptureConfig::default(),
            server: ServerConfig::default(),
            bus: BusConfig::default(),
            webrtc: WebRtcConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Empty means derive from the hostname
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { id: String::new(), node_type: "camera-usb".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// JPEG quality for converted frames, 1-100
    pub quality: u8,
    /// Defaults to `v4l2` when compiled in, otherwise `replay` (see [`BackendKind`])
    pub backend: BackendKind,
    pub conversion: ConversionMode,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            quality: 85,
            backend: BackendKind::default(),
            conversion: ConversionMode::default(),
        }
    }
}

impl CameraConfig {
    pub fn size(&self) -> FrameSize {
        FrameSize { width: self.width, height: self.height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bounded wait for one frame
    pub frame_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { frame_timeout_ms: 5000 }
    }
}

impl CaptureConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    /// `*` or a comma-separated list of allowed origins
    pub cors_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { http_port: 8080, cors_origins: "*".to_string() }
    }
}

impl ServerConfig {
    /// Explicit allowed origins, or `None` when any origin is accepted
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        if self.cors_origins.trim() == "*" {
            return None;
        }
        Some(self.cors_origins.split(',').map(str::trim).filter(|o| !o.is_empty()).map(String::from).collect())
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        match self.allowed_origins() {
            None => true,
            Some(allowed) => allowed.iter().any(|o| o == origin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Local,
    Zenoh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub enabled: bool,
    pub backend: BusBackend,
    pub endpoint: Option<String>,
    pub status_interval_secs: u64,
    pub frame_metadata_hz: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BusBackend::default(),
            endpoint: None,
            status_interval_secs: 30,
            frame_metadata_hz: 1.0,
        }
    }
}

impl BusConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_metadata_hz)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    pub enabled: bool,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
        }
    }
}

impl WebRtcConfig {
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let stun = (!self.stun_servers.is_empty()).then(|| IceServer {
            urls: self.stun_servers.clone(),
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|turn| IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
        stun.into_iter().chain(turn).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub pretty: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), pretty: false }
    }
}

impl Config {
    /// Parse a YAML document over the defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| DriverError::config(format!("invalid YAML: {e}")))
    }

    /// Read `path`, or the first existing default path when `None`
    pub fn from_file(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|p| p.is_file()) {
                Some(found) => found,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let yaml = std::fs::read_to_string(&path)
            .map_err(|e| DriverError::config(format!("cannot read {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_yaml(&yaml)
    }

    /// Full load: file, environment, flags, node id resolution and validation
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = Self::from_file(args.config.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_args(args);
        config.resolve_node_id();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TAFY_CAMERA_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(device) = var("DEVICE") {
            self.device = device;
        }
        if let Some(id) = var("NODE_ID") {
            self.node.id = id;
        }
        if let Some(port) = var("HTTP_PORT") {
            self.server.http_port = parse_env("HTTP_PORT", &port)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(endpoint) = var("BUS_ENDPOINT") {
            self.bus.endpoint = Some(endpoint);
        }
        if let Some(fps) = var("FPS") {
            self.camera.fps = parse_env("FPS", &fps)?;
        }
        Ok(())
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(device) = &args.device {
            self.device = device.clone();
        }
        if let Some(id) = args.node_id.as_ref().filter(|id| !id.is_empty()) {
            self.node.id = id.clone();
        }
        if let Some(port) = args.http_port {
            self.server.http_port = port;
        }
        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }
    }

    /// Fill an empty node id from the hostname
    pub fn resolve_node_id(&mut self) {
        if self.node.id.is_empty() {
            let host = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default();
            self.node.id = node_id_from_hostname(&host);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(DriverError::config(format!(
                "invalid camera resolution: {}x{}",
                camera.width, camera.height
            )));
        }
        if camera.fps == 0 || camera.fps > MAX_FPS {
            return Err(DriverError::config(format!("invalid FPS: {} (must be 1-{MAX_FPS})", camera.fps)));
        }
        if !(1..=100).contains(&camera.quality) {
            return Err(DriverError::config(format!("invalid JPEG quality: {} (must be 1-100)", camera.quality)));
        }
        if self.server.http_port == 0 {
            return Err(DriverError::config("invalid HTTP port: 0"));
        }
        if self.capture.frame_timeout_ms == 0 {
            return Err(DriverError::config("capture frame timeout must be positive"));
        }
        if self.bus.enabled && !(self.bus.frame_metadata_hz > 0.0 && self.bus.frame_metadata_hz.is_finite()) {
            return Err(DriverError::config(format!(
                "invalid frame metadata rate: {} Hz",
                self.bus.frame_metadata_hz
            )));
        }
        if self.bus.enabled && self.bus.status_interval_secs == 0 {
            return Err(DriverError::config("status interval must be positive"));
        }
        if !Path::new(&self.device).exists() {
            return Err(DriverError::config(format!("camera device not found: {}", self.device)));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| DriverError::config(format!("{ENV_PREFIX}{name}={value}: {e}")))
}

/// `camera-<host>` with the host lower-cased and dots replaced by dashes
pub fn node_id_from_hostname(host: &str) -> String {
    let host = if host.is_empty() { "unknown" } else { host };
    format!("camera-{}", host.replace('.', "-").to_lowercase())
}
