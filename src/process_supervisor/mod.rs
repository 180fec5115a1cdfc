//! ProcessSupervisor - child process lifecycle
//!
//! ## Responsibilities
//!
//! - Spawn named children (sender processes, the recorder)
//! - Stop them with SIGTERM, a 100 ms grace period, then SIGKILL
//! - Reap every exit on a per-child monitor task and publish it on the exit
//!   channel so owners (the peer manager) can evict dead peers
//!
//! Children are spawned with `kill_on_drop` so nothing outlives the
//! controller even on an abnormal teardown.

use crate::error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::timeout;

/// SIGTERM grace before escalating to SIGKILL
const STOP_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on a stop request end to end
const STOP_DEADLINE: Duration = Duration::from_secs(2);

/// Registered name of the recorder child
const RECORDER_NAME: &str = "recorder";

/// One reaped child exit
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub name: String,
    pub pid: u32,
    pub status: Option<ExitStatus>,
}

struct ProcessEntry {
    pid: u32,
    running: watch::Receiver<bool>,
    stop_tx: mpsc::Sender<()>,
}

/// ProcessSupervisor instance
pub struct ProcessSupervisor {
    processes: RwLock<HashMap<String, ProcessEntry>>,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
}

impl ProcessSupervisor {
    /// Create the supervisor and the exit-event stream consumed by owners
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProcessExit>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                processes: RwLock::new(HashMap::new()),
                exit_tx,
            }),
            exit_rx,
        )
    }

    /// Spawn a child and register it under `name`.
    ///
    /// Re-spawning a still-running name returns the existing pid.
    pub async fn spawn(&self, name: &str, program: &str, args: &[String]) -> Result<u32> {
        {
            let processes = self.processes.read().await;
            if let Some(entry) = processes.get(name) {
                if *entry.running.borrow() {
                    tracing::warn!(name = %name, pid = entry.pid, "Process already running");
                    return Ok(entry.pid);
                }
            }
        }

        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ChildSpawnFailed(format!("{} ({}): {}", name, program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::ChildSpawnFailed(format!("{}: no pid", name)))?;

        let (running_tx, running_rx) = watch::channel(true);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        {
            let mut processes = self.processes.write().await;
            processes.insert(
                name.to_string(),
                ProcessEntry {
                    pid,
                    running: running_rx,
                    stop_tx,
                },
            );
        }

        tracing::info!(name = %name, pid, program = %program, "Started process");

        // Monitor task: the single place this child is waited on
        let exit_tx = self.exit_tx.clone();
        let task_name = name.to_string();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = stop_rx.recv() => {
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        tracing::debug!(pid, error = %e, "SIGTERM delivery failed");
                    }
                    match timeout(STOP_GRACE, child.wait()).await {
                        Ok(status) => status.ok(),
                        Err(_) => {
                            tracing::warn!(name = %task_name, pid, "SIGTERM grace expired, sending SIGKILL");
                            let _ = child.start_kill();
                            child.wait().await.ok()
                        }
                    }
                }
            };

            match status {
                Some(status) => tracing::info!(
                    name = %task_name,
                    pid,
                    code = status.code(),
                    "Process exited"
                ),
                None => tracing::warn!(name = %task_name, pid, "Process wait failed"),
            }

            let _ = running_tx.send(false);
            let _ = exit_tx.send(ProcessExit {
                name: task_name,
                pid,
                status,
            });
        });

        Ok(pid)
    }

    /// Stop a named child: SIGTERM, 100 ms grace, SIGKILL
    pub async fn stop(&self, name: &str) -> Result<()> {
        let (stop_tx, mut running) = {
            let processes = self.processes.read().await;
            let entry = match processes.get(name) {
                Some(entry) => entry,
                None => {
                    return Err(Error::Validation(format!("process {} not found", name)));
                }
            };
            if !*entry.running.borrow() {
                tracing::debug!(name = %name, "Process already stopped");
                return Ok(());
            }
            (entry.stop_tx.clone(), entry.running.clone())
        };

        let _ = stop_tx.send(()).await;

        let result = timeout(STOP_DEADLINE, running.wait_for(|r| !*r)).await;
        match result {
            Ok(_) => {
                tracing::info!(name = %name, "Stopped process");
                Ok(())
            }
            Err(_) => Err(Error::Timeout(format!("stopping process {}", name))),
        }
    }

    /// Whether the named child is still alive
    pub async fn is_running(&self, name: &str) -> bool {
        let processes = self.processes.read().await;
        processes
            .get(name)
            .is_some_and(|entry| *entry.running.borrow())
    }

    /// Pid of a running child
    pub async fn pid_of(&self, name: &str) -> Option<u32> {
        let processes = self.processes.read().await;
        processes
            .get(name)
            .filter(|entry| *entry.running.borrow())
            .map(|entry| entry.pid)
    }

    /// Stop everything still running (shutdown path)
    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let processes = self.processes.read().await;
            processes
                .iter()
                .filter(|(_, entry)| *entry.running.borrow())
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in names {
            if let Err(e) = self.stop(&name).await {
                tracing::warn!(name = %name, error = %e, "Failed to stop process");
            }
        }

        tracing::info!("All processes stopped");
    }

    /// Launch the recorder child
    pub async fn start_recording(
        &self,
        recorder_binary: &str,
        device_count: u16,
        stream_base_port: u16,
        codec_name: &str,
        location: &str,
        duration_secs: u32,
    ) -> Result<u32> {
        let args = vec![
            format!("--stream_cnt={}", device_count),
            format!("--stream_base_port={}", stream_base_port),
            format!("--codec_name={}", codec_name),
            format!("--location={}", location),
            format!("--duration={}", duration_secs),
        ];
        self.spawn(RECORDER_NAME, recorder_binary, &args).await
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.stop(RECORDER_NAME).await
    }

    pub async fn is_recording_active(&self) -> bool {
        self.is_running(RECORDER_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let (supervisor, mut exits) = ProcessSupervisor::new();

        let pid = supervisor
            .spawn("short", "/bin/sleep", &["0.05".to_string()])
            .await
            .unwrap();
        assert!(supervisor.is_running("short").await);

        let exit = timeout(Duration::from_secs(5), exits.recv())
            .await
            .expect("no exit event")
            .unwrap();
        assert_eq!(exit.name, "short");
        assert_eq!(exit.pid, pid);
        assert!(exit.status.unwrap().success());
        assert!(!supervisor.is_running("short").await);
    }

    #[tokio::test]
    async fn test_stop_terminates_child() {
        let (supervisor, mut exits) = ProcessSupervisor::new();

        supervisor
            .spawn("long", "/bin/sleep", &["30".to_string()])
            .await
            .unwrap();
        assert!(supervisor.is_running("long").await);
        assert!(supervisor.pid_of("long").await.is_some());

        supervisor.stop("long").await.unwrap();
        assert!(!supervisor.is_running("long").await);
        assert!(supervisor.pid_of("long").await.is_none());

        // SIGTERM-killed children report a signal, not success
        let exit = exits.recv().await.unwrap();
        assert_eq!(exit.name, "long");
        assert!(!exit.status.unwrap().success());

        // Stopping again is a no-op
        supervisor.stop("long").await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (supervisor, _exits) = ProcessSupervisor::new();
        let result = supervisor
            .spawn("ghost", "/nonexistent/binary", &[])
            .await;
        assert!(matches!(result, Err(Error::ChildSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_stop_unknown_process() {
        let (supervisor, _exits) = ProcessSupervisor::new();
        assert!(supervisor.stop("nobody").await.is_err());
    }
}
