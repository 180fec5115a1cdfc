//! MediaGraph - seam to the capture/encode graph
//!
//! The capture pipeline is an external collaborator: the controller only
//! asks it to start or stop feeding RTP to a per-peer port. Fan-outs are
//! keyed by `(camera_index, peer_id)`; the graph owns whatever element
//! table sits behind that.

use crate::error::Result;

/// Per-peer fan-out contract toward the capture graph
pub trait MediaGraph: Send + Sync {
    /// Start feeding `camera_index` to `port` for this peer
    fn add_peer_output(&self, camera_index: u16, peer_id: &str, port: u16) -> Result<()>;

    /// Stop feeding this peer from `camera_index`
    fn remove_peer_output(&self, camera_index: u16, peer_id: &str);
}

/// Used when the capture graph runs out of process and manages its own
/// fan-out; requests are logged and acknowledged.
pub struct DetachedMediaGraph;

impl MediaGraph for DetachedMediaGraph {
    fn add_peer_output(&self, camera_index: u16, peer_id: &str, port: u16) -> Result<()> {
        tracing::debug!(camera_index, peer_id = %peer_id, port, "Peer output requested");
        Ok(())
    }

    fn remove_peer_output(&self, camera_index: u16, peer_id: &str) {
        tracing::debug!(camera_index, peer_id = %peer_id, "Peer output released");
    }
}
