//! SystemConfig - immutable appliance configuration
//!
//! ## Responsibilities
//!
//! - Load the JSON config file given on the command line
//! - Validate the handful of values everything else depends on
//!
//! The file is read once at startup; a broken config is fatal, and startup
//! is the only place this process is allowed to die.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Serial line attached to the PTZ head
#[derive(Debug, Clone, Deserialize)]
pub struct TtyConfig {
    /// Device node, e.g. `/dev/ttyUSB0`
    pub name: String,
    /// Line speed; the head ships at 38400 8N1
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

fn default_baudrate() -> u32 {
    38_400
}

/// System configuration (config.json)
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Camera identity announced to the signalling broker
    pub camera_id: String,
    /// Number of video devices (RGB + thermal = 2)
    #[serde(default = "default_device_cnt")]
    pub device_cnt: u16,
    /// Maximum simultaneous remote viewers
    #[serde(default = "default_max_stream_cnt")]
    pub max_stream_cnt: usize,
    /// First RTP port handed to sender children
    #[serde(default = "default_stream_base_port")]
    pub stream_base_port: u16,
    /// First UDP control-socket port for sender children
    #[serde(default = "default_comm_base_port")]
    pub comm_base_port: u16,
    /// Detection query HTTP port
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Signalling broker base URL (ws:// or wss://)
    #[serde(default = "default_server_ip")]
    pub server_ip: String,
    /// Codec advertised to sender children
    #[serde(default = "default_codec_name")]
    pub codec_name: String,
    /// Path of the per-peer sender binary
    #[serde(default = "default_sender_binary")]
    pub sender_binary: String,
    /// Path of the recorder binary
    #[serde(default = "default_recorder_binary")]
    pub recorder_binary: String,
    /// PTZ serial line; absent means no PTZ head attached
    #[serde(default)]
    pub tty: Option<TtyConfig>,
    /// Recording output directory
    #[serde(default = "default_record_path")]
    pub record_path: String,
    /// Recording segment length in seconds
    #[serde(default = "default_record_duration")]
    pub record_duration: u32,
    /// Firmware version reported in the register frame
    #[serde(default = "default_version")]
    pub fw_version: String,
    /// Detection model version reported in the register frame
    #[serde(default = "default_version")]
    pub ai_version: String,
    /// Where the mutable device settings live
    #[serde(default = "default_device_setting_path")]
    pub device_setting_path: String,
}

fn default_device_cnt() -> u16 {
    2
}

fn default_max_stream_cnt() -> usize {
    10
}

fn default_stream_base_port() -> u16 {
    5000
}

fn default_comm_base_port() -> u16 {
    6000
}

fn default_api_port() -> u16 {
    8080
}

fn default_server_ip() -> String {
    "ws://localhost:8443".to_string()
}

fn default_codec_name() -> String {
    "h264".to_string()
}

fn default_sender_binary() -> String {
    "./webrtc_sender".to_string()
}

fn default_recorder_binary() -> String {
    "./webrtc_recorder".to_string()
}

fn default_record_path() -> String {
    "/var/lib/ranchcast/record".to_string()
}

fn default_record_duration() -> u32 {
    300
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_device_setting_path() -> String {
    "device_setting.json".to_string()
}

impl SystemConfig {
    /// Load and validate the config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: SystemConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigInvalid(format!("{}: {}", path.display(), e)))?;

        config.validate()?;

        tracing::info!(
            camera_id = %config.camera_id,
            device_cnt = config.device_cnt,
            max_stream_cnt = config.max_stream_cnt,
            stream_base_port = config.stream_base_port,
            api_port = config.api_port,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.camera_id.is_empty() {
            return Err(Error::ConfigInvalid("camera_id must not be empty".into()));
        }
        if self.device_cnt == 0 {
            return Err(Error::ConfigInvalid("device_cnt must be at least 1".into()));
        }
        if self.max_stream_cnt == 0 {
            return Err(Error::ConfigInvalid(
                "max_stream_cnt must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// URL the signalling bridge connects to
    pub fn signaling_url(&self) -> String {
        format!(
            "{}/signaling/{}/?token=test&peerType=camera",
            self.server_ip.trim_end_matches('/'),
            self.camera_id
        )
    }
}
