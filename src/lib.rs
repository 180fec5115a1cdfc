//! RanchCast - dual-camera WebRTC broadcast controller
//!
//! ## Architecture (10 Components)
//!
//! 1. SystemConfig - immutable appliance configuration
//! 2. SettingsStore - mutable device settings with dirty-flag persistence
//! 3. ProcessSupervisor - child process spawn/stop/reap
//! 4. SerialLink - framed byte I/O to the PTZ head
//! 5. DetectionRing - per-camera time-indexed detection log
//! 6. PtzController - serial PTZ protocol, presets, auto-tour
//! 7. CommandPipe - named-FIFO control surface
//! 8. QueryApi - HTTP detection queries
//! 9. SignalingBridge - WebSocket offer/answer/ICE multiplexing + telemetry
//! 10. PeerManager - one sender child per remote viewer, port pool, IPC
//!
//! The video capture/encode graph and the inference engine sit behind the
//! `media_graph::MediaGraph` seam and the detection ring write handle; the
//! per-peer sender binary is an external collaborator reached over UDP.

pub mod command_pipe;
pub mod config;
pub mod detection_ring;
pub mod error;
pub mod media_graph;
pub mod peer_manager;
pub mod process_supervisor;
pub mod ptz_controller;
pub mod query_api;
pub mod serial_link;
pub mod settings_store;
pub mod signaling;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
