//! Application state
//!
//! Holds all shared components and state

use crate::config::SystemConfig;
use crate::detection_ring::DetectionRing;
use crate::peer_manager::PeerManager;
use crate::process_supervisor::ProcessSupervisor;
use crate::ptz_controller::PtzController;
use crate::settings_store::SettingsStore;
use crate::signaling::SignalingBridge;
use std::sync::Arc;

/// Application state shared across components
#[derive(Clone)]
pub struct AppState {
    /// Immutable system configuration
    pub config: Arc<SystemConfig>,
    /// Mutable device settings
    pub settings: Arc<SettingsStore>,
    /// RGB camera detection log (write side owned by the inference engine)
    pub rgb_ring: Arc<DetectionRing>,
    /// Thermal camera detection log
    pub thermal_ring: Arc<DetectionRing>,
    /// Child process registry
    pub processes: Arc<ProcessSupervisor>,
    /// PTZ head; absent when no serial line is configured
    pub ptz: Option<Arc<PtzController>>,
    /// Per-viewer sender supervision
    pub peers: Arc<PeerManager>,
    /// WebSocket link to the signalling broker
    pub bridge: Arc<SignalingBridge>,
}
