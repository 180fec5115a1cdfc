//! PeerManager - one sender child per remote viewer
//!
//! ## Responsibilities
//!
//! - Own the peer table and the port pool
//! - Spawn/tear down a [`PeerSupervisor`] per viewer as room events arrive
//! - Shuttle signalling JSON between the bridge and each sender child
//! - Evict peers whose child died
//!
//! Locking: one mutex for the peer table, a separate one for the port pool.
//! `remove_peer` extracts the supervisor under the table lock and tears it
//! down after dropping it, so a slow child exit never blocks other peers
//! and a child-exit callback can re-enter the manager safely.

mod ports;
mod supervisor;

pub use ports::{PortAllocation, PortPool};
pub use supervisor::{ChildMessageCallback, PeerState, PeerSupervisor};

use crate::detection_ring::CameraKind;
use crate::error::{Error, Result};
use crate::media_graph::MediaGraph;
use crate::process_supervisor::{ProcessExit, ProcessSupervisor};
use crate::signaling::{SignalEvent, SignalingBridge};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Prefix of sender child names in the process supervisor
const SENDER_NAME_PREFIX: &str = "sender-";

/// PeerManager configuration
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub max_peers: usize,
    pub stream_base_port: u16,
    pub comm_base_port: u16,
    pub device_count: u16,
    pub codec_name: String,
    pub sender_binary: String,
}

/// PeerManager instance
pub struct PeerManager {
    config: PeerManagerConfig,
    peers: Mutex<HashMap<String, Arc<PeerSupervisor>>>,
    ports: std::sync::Mutex<PortPool>,
    media: Arc<dyn MediaGraph>,
    processes: Arc<ProcessSupervisor>,
    bridge: Arc<SignalingBridge>,
}

impl PeerManager {
    pub fn new(
        config: PeerManagerConfig,
        media: Arc<dyn MediaGraph>,
        processes: Arc<ProcessSupervisor>,
        bridge: Arc<SignalingBridge>,
    ) -> Arc<Self> {
        tracing::info!(
            max_peers = config.max_peers,
            stream_base_port = config.stream_base_port,
            comm_base_port = config.comm_base_port,
            codec = %config.codec_name,
            "Peer manager created"
        );

        let ports = PortPool::new(
            config.max_peers,
            config.stream_base_port,
            config.comm_base_port,
            config.device_count,
        );

        Arc::new(Self {
            config,
            peers: Mutex::new(HashMap::new()),
            ports: std::sync::Mutex::new(ports),
            media,
            processes,
            bridge,
        })
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn has_peer(&self, peer_id: &str) -> bool {
        self.peers.lock().await.contains_key(peer_id)
    }

    /// Provision ports and media fan-out, then start a sender for `peer_id`.
    ///
    /// Failure at any step releases everything already reserved.
    pub async fn add_peer(self: &Arc<Self>, peer_id: &str, source: CameraKind) -> Result<()> {
        let mut peers = self.peers.lock().await;

        if peers.contains_key(peer_id) {
            return Err(Error::PeerDuplicate(peer_id.to_string()));
        }

        let allocation = self.ports.lock().expect("port mutex").allocate()?;

        // Thermal viewers take the thermal leg of the reserved block
        let child_stream_port = match source {
            CameraKind::Thermal => allocation.stream_base + 1,
            CameraKind::Rgb => allocation.stream_base,
        };

        // Camera-side fan-out, one leg per device
        let mut added_outputs = 0u16;
        let mut fanout_result = Ok(());
        for camera_index in 0..self.config.device_count {
            match self.media.add_peer_output(
                camera_index,
                peer_id,
                allocation.stream_base + camera_index,
            ) {
                Ok(()) => added_outputs += 1,
                Err(e) => {
                    fanout_result = Err(e);
                    break;
                }
            }
        }
        if let Err(e) = fanout_result {
            for camera_index in 0..added_outputs {
                self.media.remove_peer_output(camera_index, peer_id);
            }
            self.ports.lock().expect("port mutex").release(allocation);
            return Err(e);
        }

        let supervisor = Arc::new(PeerSupervisor::new(
            peer_id,
            allocation,
            child_stream_port,
            Arc::clone(&self.processes),
        ));

        // Child-originated JSON goes back out through the bridge
        let manager = Arc::downgrade(self);
        let callback: ChildMessageCallback = Arc::new(move |peer_id: &str, text: &str| {
            if let Some(manager) = manager.upgrade() {
                let peer_id = peer_id.to_string();
                let text = text.to_string();
                tokio::spawn(async move {
                    manager.forward_child_message(&peer_id, &text).await;
                });
            }
        });

        if let Err(e) = supervisor
            .start(
                &self.config.sender_binary,
                self.config.device_count,
                &self.config.codec_name,
                callback,
            )
            .await
        {
            for camera_index in 0..self.config.device_count {
                self.media.remove_peer_output(camera_index, peer_id);
            }
            self.ports.lock().expect("port mutex").release(allocation);
            return Err(e);
        }

        peers.insert(peer_id.to_string(), supervisor);
        tracing::info!(
            peer_id = %peer_id,
            source = ?source,
            stream_base = allocation.stream_base,
            comm_port = allocation.comm_port,
            "Added peer"
        );
        Ok(())
    }

    /// Remove a peer and free its ports.
    ///
    /// The supervisor is extracted under the lock and torn down outside it.
    pub async fn remove_peer(&self, peer_id: &str) -> Result<()> {
        let supervisor = {
            let mut peers = self.peers.lock().await;
            peers
                .remove(peer_id)
                .ok_or_else(|| Error::PeerUnknown(peer_id.to_string()))?
        };

        for camera_index in 0..self.config.device_count {
            self.media.remove_peer_output(camera_index, peer_id);
        }

        supervisor.stop().await;

        self.ports
            .lock()
            .expect("port mutex")
            .release(supervisor.allocation());

        tracing::info!(peer_id = %peer_id, "Removed peer");
        Ok(())
    }

    /// Dispatch one normalised signalling event
    pub async fn handle_signal_event(self: &Arc<Self>, event: SignalEvent) {
        match event {
            SignalEvent::PeerJoined { peer_id, source } => {
                let camera = match source.as_deref() {
                    Some("Thermal") => CameraKind::Thermal,
                    _ => CameraKind::Rgb,
                };
                if self.has_peer(&peer_id).await {
                    tracing::warn!(peer_id = %peer_id, "Peer already exists, ignoring join");
                    return;
                }
                if let Err(e) = self.add_peer(&peer_id, camera).await {
                    tracing::error!(peer_id = %peer_id, error = %e, "Failed to add peer");
                }
            }
            SignalEvent::PeerLeft { peer_id } => {
                if let Err(e) = self.remove_peer(&peer_id).await {
                    tracing::warn!(peer_id = %peer_id, error = %e, "Failed to remove peer");
                }
            }
            SignalEvent::Offer { peer_id, sdp } => {
                let payload = json!({"sdp": {"type": "offer", "sdp": sdp}});
                self.deliver_to_child(&peer_id, payload).await;
            }
            SignalEvent::Answer { peer_id, sdp } => {
                let payload = json!({"sdp": {"type": "answer", "sdp": sdp}});
                self.deliver_to_child(&peer_id, payload).await;
            }
            SignalEvent::Candidate { peer_id, ice } => {
                let payload = json!({ "ice": ice });
                self.deliver_to_child(&peer_id, payload).await;
            }
        }
    }

    /// Child-exit reconciliation: evict the peer whose sender died
    pub async fn handle_process_exit(&self, exit: &ProcessExit) {
        let Some(peer_id) = exit.name.strip_prefix(SENDER_NAME_PREFIX) else {
            return;
        };

        // Only evict if the dead child still belongs to the table; a normal
        // remove_peer has already taken it out by the time its exit arrives
        if self.has_peer(peer_id).await {
            tracing::warn!(peer_id = %peer_id, pid = exit.pid, "Sender child died, evicting peer");
            if let Err(e) = self.remove_peer(peer_id).await {
                tracing::warn!(peer_id = %peer_id, error = %e, "Eviction failed");
            }
        }
    }

    /// Tear down every peer (shutdown path)
    pub async fn shutdown(&self) {
        let peer_ids: Vec<String> = self.peers.lock().await.keys().cloned().collect();
        for peer_id in peer_ids {
            if let Err(e) = self.remove_peer(&peer_id).await {
                tracing::warn!(peer_id = %peer_id, error = %e, "Shutdown removal failed");
            }
        }
        tracing::info!("All peers stopped");
    }

    async fn deliver_to_child(&self, peer_id: &str, payload: Value) {
        let supervisor = {
            let peers = self.peers.lock().await;
            peers.get(peer_id).cloned()
        };

        match supervisor {
            Some(supervisor) => {
                if let Err(e) = supervisor.send_to_child(&payload.to_string()).await {
                    tracing::error!(peer_id = %peer_id, error = %e, "Failed to deliver to sender");
                }
            }
            None => {
                tracing::error!(peer_id = %peer_id, "No such peer for signalling payload");
            }
        }
    }

    /// Re-frame a child envelope and send it upstream through the bridge
    async fn forward_child_message(&self, peer_id: &str, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "Bad JSON from sender child");
                return;
            }
        };

        let Some(action) = value["action"].as_str() else {
            tracing::warn!(peer_id = %peer_id, "Sender message without action");
            return;
        };
        let message = &value["message"];

        let result = match action {
            "offer" | "answer" => {
                let Some(sdp) = message["sdp"]["sdp"].as_str() else {
                    tracing::warn!(peer_id = %peer_id, action, "Sender SDP message without sdp text");
                    return;
                };
                if action == "offer" {
                    self.bridge.send_offer(peer_id, sdp).await
                } else {
                    self.bridge.send_answer(peer_id, sdp).await
                }
            }
            "candidate" => {
                let ice = &message["ice"];
                let Some(candidate) = ice["candidate"].as_str() else {
                    tracing::warn!(peer_id = %peer_id, "Sender candidate without candidate text");
                    return;
                };
                let mline = ice["sdpMLineIndex"].as_i64().unwrap_or(0);
                self.bridge.send_candidate(peer_id, candidate, mline).await
            }
            other => {
                tracing::debug!(peer_id = %peer_id, action = %other, "Ignoring sender action");
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!(peer_id = %peer_id, action, error = %e, "Upstream forward failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_store::SettingsStore;
    use crate::signaling::BridgeConfig;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records fan-out calls; can be primed to fail
    struct RecordingMediaGraph {
        calls: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingMediaGraph {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl MediaGraph for RecordingMediaGraph {
        fn add_peer_output(&self, camera_index: u16, peer_id: &str, port: u16) -> Result<()> {
            if self.fail {
                return Err(Error::Internal("fan-out refused".to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("add {} cam{} port{}", peer_id, camera_index, port));
            Ok(())
        }

        fn remove_peer_output(&self, camera_index: u16, peer_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remove {} cam{}", peer_id, camera_index));
        }
    }

    async fn test_manager(
        max_peers: usize,
        comm_base_port: u16,
        media: Arc<dyn MediaGraph>,
    ) -> Arc<PeerManager> {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::load(dir.path().join("settings.json"))
                .await
                .unwrap(),
        );
        let (bridge, _events) = SignalingBridge::new(
            BridgeConfig {
                url: "ws://127.0.0.1:1/".to_string(),
                camera_name: "test".to_string(),
                fw_version: "0".to_string(),
                ai_version: "0".to_string(),
                reconnect_interval: Duration::from_secs(1),
                telemetry_interval: Duration::from_secs(3600),
            },
            settings,
        );
        let (processes, _exits) = ProcessSupervisor::new();

        PeerManager::new(
            PeerManagerConfig {
                max_peers,
                stream_base_port: 5000,
                comm_base_port,
                device_count: 2,
                codec_name: "h264".to_string(),
                // Exits immediately but ignores its arguments, which is all
                // the lifecycle bookkeeping needs
                sender_binary: "true".to_string(),
            },
            media,
            processes,
            bridge,
        )
    }

    #[tokio::test]
    async fn test_peer_lifecycle_port_assignment() {
        let media = RecordingMediaGraph::new(false);
        let manager = test_manager(2, 47100, media.clone()).await;

        manager.add_peer("A", CameraKind::Rgb).await.unwrap();
        manager.add_peer("B", CameraKind::Thermal).await.unwrap();

        // One fan-out leg per device per peer
        {
            let calls = media.calls.lock().unwrap();
            assert_eq!(
                calls.iter().filter(|c| c.starts_with("add A")).count(),
                2
            );
            assert!(calls.contains(&"add B cam0 port5002".to_string()));
            assert!(calls.contains(&"add B cam1 port5003".to_string()));
        }

        {
            let peers = manager.peers.lock().await;
            let a = peers.get("A").unwrap();
            assert_eq!(a.peer_id(), "A");
            assert_eq!(a.process_name(), "sender-A");
            assert_eq!(a.allocation().stream_base, 5000);
            assert_eq!(a.allocation().comm_port, 47100);
            assert_eq!(a.child_stream_port(), 5000);

            // Thermal child takes the second leg of its own block
            let b = peers.get("B").unwrap();
            assert_eq!(b.allocation().stream_base, 5002);
            assert_eq!(b.child_stream_port(), 5003);
            assert_eq!(b.allocation().comm_port, 47101);
        }

        // Freed slot is reallocated to the next peer, lowest-free-first
        manager.remove_peer("A").await.unwrap();
        manager.add_peer("C", CameraKind::Rgb).await.unwrap();
        {
            let peers = manager.peers.lock().await;
            let c = peers.get("C").unwrap();
            assert_eq!(c.allocation().stream_base, 5000);
            assert_eq!(c.allocation().comm_port, 47100);
        }

        manager.shutdown().await;
        assert_eq!(manager.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_capacity_errors() {
        let media = RecordingMediaGraph::new(false);
        let manager = test_manager(1, 47110, media).await;

        manager.add_peer("A", CameraKind::Rgb).await.unwrap();
        assert!(matches!(
            manager.add_peer("A", CameraKind::Rgb).await,
            Err(Error::PeerDuplicate(_))
        ));
        assert!(matches!(
            manager.add_peer("B", CameraKind::Rgb).await,
            Err(Error::PortExhausted(_))
        ));

        // Nothing leaked: the only peer is still A
        assert_eq!(manager.peer_count().await, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_fanout_failure_releases_ports() {
        let media = RecordingMediaGraph::new(true);
        let manager = test_manager(1, 47120, media).await;

        assert!(manager.add_peer("A", CameraKind::Rgb).await.is_err());
        assert_eq!(manager.peer_count().await, 0);

        // The slot must be free again
        assert_eq!(manager.ports.lock().unwrap().free_slots(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_peer() {
        let media = RecordingMediaGraph::new(false);
        let manager = test_manager(1, 47130, media).await;
        assert!(matches!(
            manager.remove_peer("ghost").await,
            Err(Error::PeerUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_candidate_event_reaches_child_as_ice_payload() {
        let media = RecordingMediaGraph::new(false);
        let manager = test_manager(1, 47140, media).await;
        manager.add_peer("X", CameraKind::Rgb).await.unwrap();

        // Stand-in child: completes the CONNECT handshake, then listens
        let child = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        child.send_to(b"CONNECT", ("127.0.0.1", 47140)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let peers = manager.peers.lock().await;
            assert!(peers.get("X").unwrap().child_connected().await);
        }

        manager
            .handle_signal_event(SignalEvent::Candidate {
                peer_id: "X".to_string(),
                ice: json!({"candidate": "c", "sdpMLineIndex": 0}),
            })
            .await;

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), child.recv_from(&mut buf))
            .await
            .expect("no datagram from supervisor")
            .unwrap();
        let payload: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(
            payload,
            json!({"ice": {"candidate": "c", "sdpMLineIndex": 0}})
        );

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_join_and_leave_events() {
        let media = RecordingMediaGraph::new(false);
        let manager = test_manager(2, 47150, media).await;

        manager
            .handle_signal_event(SignalEvent::PeerJoined {
                peer_id: "T".to_string(),
                source: Some("Thermal".to_string()),
            })
            .await;
        assert!(manager.has_peer("T").await);
        {
            let peers = manager.peers.lock().await;
            assert_eq!(peers.get("T").unwrap().child_stream_port(), 5001);
        }

        manager
            .handle_signal_event(SignalEvent::PeerLeft {
                peer_id: "T".to_string(),
            })
            .await;
        assert!(!manager.has_peer("T").await);
    }
}
