//! RanchCast broadcast controller
//!
//! Main entry point: wires the detection rings, the query API, the
//! signalling bridge, the peer manager, the command pipe, and the PTZ head
//! together, then runs until SIGINT/SIGTERM.

use clap::Parser;
use ranchcast::{
    command_pipe::{CommandCallback, CommandPipe},
    config::SystemConfig,
    detection_ring::{CameraKind, DetectionRing},
    media_graph::DetachedMediaGraph,
    peer_manager::{PeerManager, PeerManagerConfig},
    process_supervisor::ProcessSupervisor,
    ptz_controller::PtzController,
    query_api::{self, QueryState},
    serial_link::SerialLink,
    settings_store::SettingsStore,
    signaling::{BridgeConfig, SignalingBridge},
    state::AppState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reconnect delay of the signalling bridge
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Period of the camstatus telemetry
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the health tick (settings flush)
const HEALTH_TICK: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "ranchcast", about = "Dual-camera WebRTC broadcast controller", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Command pipe path
    #[arg(long, default_value = "/tmp/ranchcast.pipe")]
    pipe: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ranchcast=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        pipe = %cli.pipe.display(),
        "Starting RanchCast controller"
    );

    // Fatal init: config, settings, query socket. Everything after runs
    // degraded rather than dying.
    let config = Arc::new(SystemConfig::load(&cli.config)?);
    let settings = Arc::new(SettingsStore::load(&config.device_setting_path).await?);

    let rgb_ring = Arc::new(DetectionRing::new(CameraKind::Rgb));
    let thermal_ring = Arc::new(DetectionRing::new(CameraKind::Thermal));

    let (processes, mut process_exits) = ProcessSupervisor::new();

    // PTZ head is optional equipment
    let ptz = match &config.tty {
        Some(tty) => match SerialLink::open(&tty.name, tty.baudrate) {
            Ok(serial) => Some(PtzController::new(Arc::new(serial))),
            Err(e) => {
                tracing::warn!(device = %tty.name, error = %e, "PTZ controller initialization failed");
                None
            }
        },
        None => None,
    };

    // Detection query service
    let query_state = QueryState {
        rgb: Arc::clone(&rgb_ring),
        thermal: Arc::clone(&thermal_ring),
    };
    let app = query_api::create_router(query_state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind query port {}: {}", config.api_port, e))?;
    tracing::info!(port = config.api_port, "Query API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Query API server stopped");
        }
    });

    // Signalling bridge and peer manager
    let (bridge, mut signal_events) = SignalingBridge::new(
        BridgeConfig {
            url: config.signaling_url(),
            camera_name: config.camera_id.clone(),
            fw_version: config.fw_version.clone(),
            ai_version: config.ai_version.clone(),
            reconnect_interval: RECONNECT_INTERVAL,
            telemetry_interval: TELEMETRY_INTERVAL,
        },
        Arc::clone(&settings),
    );

    let peers = PeerManager::new(
        PeerManagerConfig {
            max_peers: config.max_stream_cnt,
            stream_base_port: config.stream_base_port,
            comm_base_port: config.comm_base_port,
            device_count: config.device_cnt,
            codec_name: config.codec_name.clone(),
            sender_binary: config.sender_binary.clone(),
        },
        Arc::new(DetachedMediaGraph),
        Arc::clone(&processes),
        Arc::clone(&bridge),
    );

    let state = AppState {
        config: Arc::clone(&config),
        settings: Arc::clone(&settings),
        rgb_ring,
        thermal_ring,
        processes: Arc::clone(&processes),
        ptz: ptz.clone(),
        peers: Arc::clone(&peers),
        bridge: Arc::clone(&bridge),
    };

    // Signalling events drive the peer table
    {
        let peers = Arc::clone(&peers);
        tokio::spawn(async move {
            while let Some(event) = signal_events.recv().await {
                peers.handle_signal_event(event).await;
            }
        });
    }

    // Reaped child exits evict dead peers
    {
        let peers = Arc::clone(&peers);
        tokio::spawn(async move {
            while let Some(exit) = process_exits.recv().await {
                peers.handle_process_exit(&exit).await;
            }
        });
    }

    // Command pipe -> dispatcher
    let (command_tx, mut command_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let mut pipe = CommandPipe::new(&cli.pipe);
    let callback: CommandCallback = Arc::new(move |command: &str| {
        let _ = command_tx.send(command.to_string());
    });
    if let Err(e) = pipe.open(callback) {
        tracing::error!(error = %e, "Failed to open command pipe");
    }
    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                dispatch_command(&state, &command).await;
            }
        });
    }

    // Health tick: flush dirty settings
    {
        let settings = Arc::clone(&settings);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEALTH_TICK);
            loop {
                tick.tick().await;
                if let Err(e) = settings.flush_if_dirty().await {
                    tracing::error!(error = %e, "Settings flush failed");
                }
            }
        });
    }

    bridge.connect().await;
    tracing::info!("System started successfully");

    wait_for_shutdown().await;
    tracing::info!("Shutting down");

    // Teardown in dependency order, mirroring startup
    pipe.close().await;
    if let Some(ptz) = &ptz {
        ptz.close().await;
    }
    bridge.disconnect().await;
    peers.shutdown().await;
    processes.stop_all().await;
    if let Err(e) = settings.save().await {
        tracing::error!(error = %e, "Final settings save failed");
    }

    tracing::info!("Program terminated normally");
    Ok(())
}

/// Apply one command line from the pipe
async fn dispatch_command(state: &AppState, command: &str) {
    match command {
        // PTZ menu navigation and calibration
        "up" | "down" | "left" | "right" | "enter" | "zoom_init" | "ir_init" => {
            match &state.ptz {
                Some(ptz) => {
                    if let Err(e) = ptz.send_menu_command(command).await {
                        tracing::error!(command = %command, error = %e, "PTZ command failed");
                    }
                }
                None => tracing::warn!(command = %command, "No PTZ head attached"),
            }
        }

        "record_start" => {
            state.settings.set_record_on(true).await;
            if let Err(e) = state
                .processes
                .start_recording(
                    &state.config.recorder_binary,
                    state.config.device_cnt,
                    state.config.stream_base_port,
                    &state.config.codec_name,
                    &state.config.record_path,
                    state.config.record_duration,
                )
                .await
            {
                tracing::error!(error = %e, "Failed to start recorder");
            }
        }
        "record_stop" => {
            state.settings.set_record_on(false).await;
            if let Err(e) = state.processes.stop_recording().await {
                tracing::warn!(error = %e, "Failed to stop recorder");
            }
        }

        "analysis_on" => {
            state.settings.set_analysis_on(true).await;
            state.settings.set_nv_interval(0).await;
        }
        "analysis_off" => {
            state.settings.set_analysis_on(false).await;
            // Max sentinel parks the night-vision scheduler
            state.settings.set_nv_interval(i32::MAX).await;
        }

        other => tracing::warn!(command = %other, "Unknown pipe command"),
    }
}

async fn wait_for_shutdown() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
}
