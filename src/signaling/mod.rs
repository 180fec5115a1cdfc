//! SignalingBridge - WebSocket link to the broker
//!
//! ## Responsibilities
//!
//! - Maintain the WebSocket to the signalling broker, re-registering after
//!   every successful open
//! - Auto-reconnect on close or transport error until disabled
//! - Normalise inbound offer/answer/ICE/room traffic into [`SignalEvent`]s
//! - Emit `camstatus` telemetry while connected
//!
//! State machine: Disconnected -> Connecting -> Connected ->
//! {Disconnected, Reconnecting -> Connecting}. The bridge is `Connected`
//! exactly when the socket is open and the register frame has been written.
//! Outbound sends never block: they enqueue onto the writer task.

pub mod envelope;
mod telemetry;

pub use envelope::SignalEvent;
pub use telemetry::{read_host_telemetry, HostTelemetry};

use crate::error::{Error, Result};
use crate::settings_store::SettingsStore;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Connection state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Full connect URL (`.../signaling/<camera_id>/?token=...`)
    pub url: String,
    /// Identity announced in the register frame
    pub camera_name: String,
    pub fw_version: String,
    pub ai_version: String,
    /// Delay between reconnect attempts
    pub reconnect_interval: Duration,
    /// Period of the camstatus telemetry
    pub telemetry_interval: Duration,
}

/// SignalingBridge instance
pub struct SignalingBridge {
    config: BridgeConfig,
    settings: Arc<SettingsStore>,
    auto_reconnect: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    event_tx: mpsc::UnboundedSender<SignalEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingBridge {
    /// Create the bridge and the inbound event stream
    pub fn new(
        config: BridgeConfig,
        settings: Arc<SettingsStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let bridge = Arc::new(Self {
            config,
            settings,
            auto_reconnect: AtomicBool::new(true),
            state_tx,
            outbound: Mutex::new(None),
            event_tx,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        (bridge, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions (used by tests and the startup log)
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::Release);
        tracing::info!(enabled, "Auto-reconnect changed");
    }

    /// Start the connection loop
    pub async fn connect(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        let handle = tokio::spawn(async move { bridge.run().await });
        *self.task.lock().await = Some(handle);
    }

    /// Stop reconnecting, close the socket, and wait for the loop to end
    pub async fn disconnect(&self) {
        self.set_auto_reconnect(false);
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from signalling broker");
    }

    /// Queue an offer toward a peer
    pub async fn send_offer(&self, peer_id: &str, sdp: &str) -> Result<()> {
        self.send_frame(envelope::offer(peer_id, sdp)).await
    }

    /// Queue an answer toward a peer
    pub async fn send_answer(&self, peer_id: &str, sdp: &str) -> Result<()> {
        self.send_frame(envelope::answer(peer_id, sdp)).await
    }

    /// Queue an ICE candidate toward a peer
    pub async fn send_candidate(
        &self,
        peer_id: &str,
        candidate: &str,
        sdp_mline_index: i64,
    ) -> Result<()> {
        self.send_frame(envelope::candidate(peer_id, candidate, sdp_mline_index))
            .await
    }

    async fn send_frame(&self, frame: Value) -> Result<()> {
        let outbound = self.outbound.lock().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(frame.to_string())
                .map_err(|_| Error::ConnectFailed("writer task gone".to_string())),
            None => Err(Error::ConnectFailed(
                "not connected to signalling broker".to_string(),
            )),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            tracing::info!(state = ?state, "Signalling connection state");
            self.state_tx.send_replace(state);
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.config.url, "Connecting to signalling broker");

            match connect_async(self.config.url.as_str()).await {
                Ok((ws, _)) => {
                    self.session(ws).await;
                    *self.outbound.lock().await = None;
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Signalling connect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            if self.cancel.is_cancelled() || !self.auto_reconnect.load(Ordering::Acquire) {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.config.reconnect_interval) => {}
            }
        }
    }

    /// One connected session; returns when the socket dies or we shut down
    async fn session(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut sink, mut stream) = ws.split();

        // Register first; the bridge is Connected only once this is on the wire
        let register = envelope::register(
            &self.config.camera_name,
            &self.config.fw_version,
            &self.config.ai_version,
        );
        if let Err(e) = sink.send(Message::Text(register.to_string())).await {
            tracing::error!(error = %e, "Failed to send register frame");
            return;
        }
        tracing::info!(camera = %self.config.camera_name, "Camera registration sent");
        self.set_state(ConnectionState::Connected);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().await = Some(outbound_tx);

        let mut telemetry = tokio::time::interval(self.config.telemetry_interval);
        telemetry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::error!(error = %e, "Signalling send failed");
                        return;
                    }
                }
                _ = telemetry.tick() => {
                    let frame = self.build_camstatus().await;
                    if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                        tracing::error!(error = %e, "Telemetry send failed");
                        return;
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Signalling socket closed by broker");
                            return;
                        }
                        Some(Ok(_)) => {} // ping/pong/binary
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Signalling socket error");
                            return;
                        }
                        None => {
                            tracing::info!("Signalling socket ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        match envelope::parse_inbound(text) {
            Ok(Some(event)) => {
                tracing::debug!(event = ?event, "Signalling event");
                let _ = self.event_tx.send(event);
            }
            Ok(None) => {}
            Err(e) => {
                // Recoverable: log and keep the session alive
                tracing::warn!(error = %e, "Malformed signalling frame");
            }
        }
    }

    async fn build_camstatus(&self) -> Value {
        let settings = self.settings.snapshot().await;
        let rec_status = if settings.record_on { "On" } else { "Off" };
        let host = read_host_telemetry();
        envelope::camstatus(
            rec_status,
            host.cpu_temperature,
            host.gpu_temperature,
            host.disk_used_percent,
        )
    }
}
