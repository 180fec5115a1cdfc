//! Per-peer sender supervisor
//!
//! Owns one sender child process and the UDP control socket it talks back
//! on. The child announces itself with a literal `CONNECT` datagram (UDP has
//! no connection to observe); every JSON datagram after that is forwarded to
//! the peer manager. `EXIT` means the child is shutting down on its own.

use super::ports::PortAllocation;
use crate::error::{Error, Result};
use crate::process_supervisor::ProcessSupervisor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one sender child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Datagrams from the child, delivered as `(peer_id, json_text)`
pub type ChildMessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// PeerSupervisor instance
pub struct PeerSupervisor {
    peer_id: String,
    allocation: PortAllocation,
    /// Stream port the child receives; thermal peers sit one above the block base
    child_stream_port: u16,
    process_name: String,
    processes: Arc<ProcessSupervisor>,
    state_tx: watch::Sender<PeerState>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    child_addr: Arc<RwLock<Option<SocketAddr>>>,
    cancel: CancellationToken,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSupervisor {
    pub fn new(
        peer_id: &str,
        allocation: PortAllocation,
        child_stream_port: u16,
        processes: Arc<ProcessSupervisor>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PeerState::New);
        Self {
            peer_id: peer_id.to_string(),
            allocation,
            child_stream_port,
            process_name: format!("sender-{}", peer_id),
            processes,
            state_tx,
            socket: RwLock::new(None),
            child_addr: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            recv_task: Mutex::new(None),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn allocation(&self) -> PortAllocation {
        self.allocation
    }

    pub fn child_stream_port(&self) -> u16 {
        self.child_stream_port
    }

    /// Name this peer's child is registered under in the process supervisor
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn state(&self) -> PeerState {
        *self.state_tx.borrow()
    }

    /// Bind the control socket, spawn the child, start the receive loop
    pub async fn start(
        &self,
        sender_binary: &str,
        device_count: u16,
        codec_name: &str,
        callback: ChildMessageCallback,
    ) -> Result<()> {
        match self.state() {
            PeerState::New | PeerState::Stopped => {}
            state => {
                return Err(Error::Validation(format!(
                    "cannot start peer {} in state {:?}",
                    self.peer_id, state
                )));
            }
        }
        self.state_tx.send_replace(PeerState::Starting);

        let socket = UdpSocket::bind(("0.0.0.0", self.allocation.comm_port))
            .await
            .map_err(|e| {
                self.state_tx.send_replace(PeerState::Stopped);
                Error::BindFailed(format!(
                    "comm socket port {}: {}",
                    self.allocation.comm_port, e
                ))
            })?;
        let socket = Arc::new(socket);
        *self.socket.write().await = Some(Arc::clone(&socket));

        let args = vec![
            format!("--peer_id={}", self.peer_id),
            format!("--stream_cnt={}", device_count),
            format!("--stream_base_port={}", self.child_stream_port),
            format!("--comm_socket_port={}", self.allocation.comm_port),
            format!("--codec_name={}", codec_name),
        ];

        if let Err(e) = self
            .processes
            .spawn(&self.process_name, sender_binary, &args)
            .await
        {
            *self.socket.write().await = None;
            self.state_tx.send_replace(PeerState::Stopped);
            return Err(e);
        }

        let peer_id = self.peer_id.clone();
        let child_addr = Arc::clone(&self.child_addr);
        let cancel = self.cancel.child_token();
        let recv_socket = socket;
        let task = tokio::spawn(async move {
            receive_loop(recv_socket, peer_id, child_addr, cancel, callback).await;
        });
        *self.recv_task.lock().await = Some(task);

        self.state_tx.send_replace(PeerState::Running);
        tracing::info!(
            peer_id = %self.peer_id,
            stream_port = self.child_stream_port,
            comm_port = self.allocation.comm_port,
            "Peer sender started"
        );
        Ok(())
    }

    /// Tear the child down: SIGTERM, 100 ms grace, SIGKILL, then close IPC
    pub async fn stop(&self) {
        match self.state() {
            PeerState::Stopped | PeerState::Stopping => return,
            _ => {}
        }
        self.state_tx.send_replace(PeerState::Stopping);

        if let Err(e) = self.processes.stop(&self.process_name).await {
            tracing::warn!(peer_id = %self.peer_id, error = %e, "Sender stop reported an error");
        }

        self.cancel.cancel();
        if let Some(task) = self.recv_task.lock().await.take() {
            let _ = task.await;
        }

        *self.socket.write().await = None;
        *self.child_addr.write().await = None;
        self.state_tx.send_replace(PeerState::Stopped);

        tracing::info!(peer_id = %self.peer_id, "Peer sender stopped");
    }

    /// Send a JSON datagram to the child; requires the CONNECT handshake
    pub async fn send_to_child(&self, text: &str) -> Result<()> {
        let socket = self
            .socket
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::ConnectFailed(format!("peer {} has no socket", self.peer_id)))?;
        let addr = self.child_addr.read().await.ok_or_else(|| {
            Error::ConnectFailed(format!("peer {} child not connected", self.peer_id))
        })?;

        socket.send_to(text.as_bytes(), addr).await?;
        tracing::debug!(peer_id = %self.peer_id, len = text.len(), "Sent datagram to sender");
        Ok(())
    }

    /// Whether the child has completed the CONNECT handshake
    pub async fn child_connected(&self) -> bool {
        self.child_addr.read().await.is_some()
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    peer_id: String,
    child_addr: Arc<RwLock<Option<SocketAddr>>>,
    cancel: CancellationToken,
    callback: ChildMessageCallback,
) {
    let mut buf = [0u8; 4096];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!(peer_id = %peer_id, error = %e, "Comm socket receive error");
                    break;
                }
            },
        };

        let text = String::from_utf8_lossy(&buf[..len]);
        let text = text.trim_end_matches(['\r', '\n', '\0']);

        match text {
            "CONNECT" => {
                *child_addr.write().await = Some(from);
                tracing::info!(peer_id = %peer_id, addr = %from, "Sender child connected");
            }
            "EXIT" => {
                tracing::info!(peer_id = %peer_id, "Sender child announced exit");
                break;
            }
            _ => callback(&peer_id, text),
        }
    }

    tracing::debug!(peer_id = %peer_id, "Comm socket receive loop ended");
}
