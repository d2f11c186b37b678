//! HAL message envelope and camera payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HAL_MAJOR: u32 = 1;
pub const HAL_MINOR: u32 = 0;
pub const CAPABILITY: &str = "camera.usb:v1.0";

pub mod schema {
    pub const FRAME: &str = "tafylabs/hal/camera/frame/1.0";
    pub const STATUS: &str = "tafylabs/hal/camera/status/1.0";
    pub const CONTROL: &str = "tafylabs/hal/camera/control/1.0";
}

/// Bus subjects for one node
pub mod subject {
    pub fn frame(node_id: &str) -> String {
        format!("hal.v1.camera.frame.{node_id}")
    }

    pub fn status(node_id: &str) -> String {
        format!("hal.v1.camera.status.{node_id}")
    }

    pub fn command(node_id: &str) -> String {
        format!("hal.v1.camera.cmd.{node_id}")
    }
}

/// Versioned wrapper around every bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub hal_major: u32,
    pub hal_minor: u32,
    pub schema: String,
    pub device_id: String,
    #[serde(default)]
    pub caps: Vec<String>,
    pub ts: DateTime<Utc>,
    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(schema: &str, device_id: &str, payload: P) -> Self {
        Self {
            hal_major: HAL_MAJOR,
            hal_minor: HAL_MINOR,
            schema: schema.to_string(),
            device_id: device_id.to_string(),
            caps: vec![CAPABILITY.to_string()],
            ts: Utc::now(),
            payload,
        }
    }
}

/// Metadata about the latest captured frame. The frame bytes never travel on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub camera_id: String,
    pub resolution: String,
    pub format: String,
    pub fps: u32,
    /// Unix milliseconds
    pub timestamp: i64,
    pub frame_count: u64,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Ready,
    Streaming,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub camera_id: String,
    pub status: CameraStatus,
    pub resolution: String,
    pub fps: u32,
    pub frame_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub stream_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Stop,
    Snapshot,
    Configure,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub command: ControlCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let envelope = Envelope::new(
            schema::STATUS,
            "camera-rpi",
            StatusPayload {
                camera_id: "/dev/video0".to_string(),
                status: CameraStatus::Streaming,
                resolution: "640x480".to_string(),
                fps: 30,
                frame_count: 12,
                error_count: 0,
                last_error: None,
                stream_url: "http://camera-rpi:8080/stream".to_string(),
            },
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["hal_major"], 1);
        assert_eq!(json["hal_minor"], 0);
        assert_eq!(json["schema"], "tafylabs/hal/camera/status/1.0");
        assert_eq!(json["caps"], serde_json::json!(["camera.usb:v1.0"]));
        assert_eq!(json["payload"]["status"], "streaming");
        assert!(json["payload"].get("last_error").is_none());
        assert!(json["ts"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn parses_control_commands() {
        let json = r#"{"hal_major":1,"hal_minor":0,"schema":"tafylabs/hal/camera/control/1.0",
            "device_id":"ops","ts":"2026-01-01T00:00:00Z","payload":{"command":"stop"}}"#;
        let envelope: Envelope<ControlPayload> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.payload.command, ControlCommand::Stop);
        assert!(envelope.caps.is_empty());

        let payload: ControlPayload = serde_json::from_str(r#"{"command":"zoom"}"#).unwrap();
        assert_eq!(payload.command, ControlCommand::Unknown);
    }

    #[test]
    fn subjects_are_node_scoped() {
        assert_eq!(subject::frame("n1"), "hal.v1.camera.frame.n1");
        assert_eq!(subject::status("n1"), "hal.v1.camera.status.n1");
        assert_eq!(subject::command("n1"), "hal.v1.camera.cmd.n1");
    }
}
