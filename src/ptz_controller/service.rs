//! PTZ controller service

use super::frames::{
    menu_frame, move_frame, recall_frame, ACK_LEN, IR_INIT_FRAME_1, IR_INIT_FRAME_2,
    POSITION_REPLY_LEN, READ_POSITION_FRAME,
};
use super::types::{Direction, PtzPreset, RANCH_PRESET_SLOTS, USER_PRESET_SLOTS};
use crate::error::{Error, Result};
use crate::serial_link::SerialLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Reply deadline shared by every command that expects one
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Dwell between the two IR calibration frames
const IR_INIT_DWELL: Duration = Duration::from_millis(1500);

struct TourHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// PTZ head controller
pub struct PtzController {
    serial: Arc<SerialLink>,
    user_presets: std::sync::Mutex<[PtzPreset; USER_PRESET_SLOTS]>,
    ranch_presets: std::sync::Mutex<[PtzPreset; RANCH_PRESET_SLOTS]>,
    tour: Mutex<Option<TourHandle>>,
    shutdown: CancellationToken,
}

impl PtzController {
    /// Attach to an already-open serial link
    pub fn new(serial: Arc<SerialLink>) -> Arc<Self> {
        tracing::info!(device = %serial.device(), "PTZ controller initialized");
        Arc::new(Self {
            serial,
            user_presets: std::sync::Mutex::new([PtzPreset::default(); USER_PRESET_SLOTS]),
            ranch_presets: std::sync::Mutex::new([PtzPreset::default(); RANCH_PRESET_SLOTS]),
            tour: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Send a move command.
    ///
    /// `speed == 0` encodes "stop" and waits up to one second for the head's
    /// acknowledgement; a missing or non-zero status is a stop failure.
    pub async fn send_move(&self, direction: Direction, speed: u8) -> Result<()> {
        let frame = move_frame(direction, speed);

        if speed > 0 {
            self.write(frame.to_vec()).await?;
            tracing::debug!(direction = ?direction, speed, "PTZ move command sent");
            return Ok(());
        }

        let reply = self.transact(frame.to_vec(), ACK_LEN).await?;
        if reply.len() < 6 {
            return Err(Error::PtzStopFailed(
                "stop acknowledgement timed out".to_string(),
            ));
        }
        if reply[4] != 0x01 || reply[5] != 0x00 {
            return Err(Error::PtzStopFailed(format!(
                "head reported status 0x{:02X}",
                reply[5]
            )));
        }

        tracing::debug!(direction = ?direction, "PTZ stop acknowledged");
        Ok(())
    }

    /// Move, then stop after `delay_ms` on a background task
    pub async fn move_and_stop(
        self: &Arc<Self>,
        direction: Direction,
        speed: u8,
        delay_ms: u64,
    ) -> Result<()> {
        self.send_move(direction, speed).await?;

        let controller = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(Duration::from_millis(delay_ms)) => {}
            }
            if let Err(e) = controller.send_move(direction, 0).await {
                tracing::warn!(error = %e, "Scheduled PTZ stop failed");
            }
        });

        Ok(())
    }

    /// Read the head's current position into preset slot `index`.
    ///
    /// `auto` selects the 32-slot ranch tour table, otherwise the 12-slot
    /// user table.
    pub async fn capture_preset(&self, index: usize, auto: bool) -> Result<()> {
        self.check_index(index, auto)?;

        let reply = self
            .transact(READ_POSITION_FRAME.to_vec(), POSITION_REPLY_LEN)
            .await?;
        if reply.len() < POSITION_REPLY_LEN {
            return Err(Error::Timeout(format!(
                "position reply incomplete ({} bytes)",
                reply.len()
            )));
        }

        let mut data = [0u8; 10];
        data.copy_from_slice(&reply[5..15]);
        let preset = PtzPreset { data, set: true };

        if auto {
            self.ranch_presets.lock().expect("preset mutex")[index] = preset;
        } else {
            self.user_presets.lock().expect("preset mutex")[index] = preset;
        }

        tracing::info!(index, auto, "PTZ preset captured");
        Ok(())
    }

    /// Drive the head to preset slot `index`
    pub async fn recall_preset(&self, index: usize, auto: bool) -> Result<()> {
        self.check_index(index, auto)?;

        let preset = if auto {
            self.ranch_presets.lock().expect("preset mutex")[index]
        } else {
            self.user_presets.lock().expect("preset mutex")[index]
        };
        if !preset.set {
            return Err(Error::Validation(format!("preset {} not set", index)));
        }

        let frame = recall_frame(&preset.data, auto);
        let reply = self.transact(frame.to_vec(), ACK_LEN).await?;
        if reply.is_empty() {
            return Err(Error::Timeout("recall acknowledgement".to_string()));
        }
        if reply.len() > 5 && reply[5] != 0x00 {
            return Err(Error::Protocol(format!(
                "recall rejected, status 0x{:02X}",
                reply[5]
            )));
        }

        tracing::info!(index, auto, "Moving to PTZ preset");
        Ok(())
    }

    /// Start the auto-tour.
    ///
    /// `sequence` is a comma-separated integer list; the final element is
    /// the dwell in seconds, everything before it is a ranch preset index.
    /// A running tour is stopped first.
    pub async fn start_auto_tour(self: &Arc<Self>, sequence: &str) -> Result<()> {
        let values = parse_tour_sequence(sequence)?;
        let (dwell_secs, positions) = values.split_last().expect("checked length");
        let dwell_secs = *dwell_secs;
        let positions: Vec<usize> = positions.to_vec();

        self.stop_auto_tour().await;

        tracing::info!(
            positions = positions.len(),
            dwell_secs,
            "Auto-tour started"
        );

        let controller = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut current = 0usize;
            loop {
                if task_cancel.is_cancelled() {
                    break;
                }

                let position = positions[current];
                if let Err(e) = controller.recall_preset(position, true).await {
                    tracing::error!(position, error = %e, "Auto-tour preset recall failed");
                }

                // Dwell in one-second steps so a stop takes effect promptly
                for _ in 0..dwell_secs {
                    tokio::select! {
                        _ = task_cancel.cancelled() => return,
                        _ = sleep(Duration::from_secs(1)) => {}
                    }
                }

                current = (current + 1) % positions.len();
            }
        });

        let mut tour = self.tour.lock().await;
        *tour = Some(TourHandle { cancel, task });

        Ok(())
    }

    /// Stop a running auto-tour; no-op when idle
    pub async fn stop_auto_tour(&self) {
        let handle = self.tour.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.task.await;
            tracing::info!("Auto-tour stopped");
        }
    }

    pub async fn is_tour_running(&self) -> bool {
        self.tour
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Vendor menu/calibration command from the command pipe
    pub async fn send_menu_command(&self, command: &str) -> Result<()> {
        if command == "ir_init" {
            self.write(IR_INIT_FRAME_1.to_vec()).await?;
            sleep(IR_INIT_DWELL).await;
            self.write(IR_INIT_FRAME_2.to_vec()).await?;
            tracing::debug!("IR init command sent");
            return Ok(());
        }

        match menu_frame(command) {
            Some(frame) => {
                self.write(frame.to_vec()).await?;
                tracing::debug!(command = %command, "Menu command sent");
                Ok(())
            }
            None => Err(Error::Validation(format!(
                "unknown menu command: {}",
                command
            ))),
        }
    }

    /// Cancel background workers (scheduled stops, tour) for shutdown
    pub async fn close(&self) {
        self.stop_auto_tour().await;
        self.shutdown.cancel();
    }

    fn check_index(&self, index: usize, auto: bool) -> Result<()> {
        let slots = if auto {
            RANCH_PRESET_SLOTS
        } else {
            USER_PRESET_SLOTS
        };
        if index >= slots {
            return Err(Error::Validation(format!(
                "preset index {} out of range (0..{})",
                index, slots
            )));
        }
        Ok(())
    }

    async fn write(&self, frame: Vec<u8>) -> Result<()> {
        let serial = Arc::clone(&self.serial);
        tokio::task::spawn_blocking(move || serial.write_all(&frame))
            .await
            .map_err(|e| Error::Internal(format!("serial task: {}", e)))?
    }

    /// Write a frame and collect up to `reply_len` bytes of response
    async fn transact(&self, frame: Vec<u8>, reply_len: usize) -> Result<Vec<u8>> {
        let serial = Arc::clone(&self.serial);
        tokio::task::spawn_blocking(move || {
            serial.write_all(&frame)?;
            let mut reply = vec![0u8; reply_len];
            let n = serial.read_with_timeout(&mut reply, REPLY_TIMEOUT)?;
            reply.truncate(n);
            Ok(reply)
        })
        .await
        .map_err(|e| Error::Internal(format!("serial task: {}", e)))?
    }
}

/// Parse a comma-separated tour sequence into preset indices plus dwell.
///
/// At least two values are required (one preset, one dwell).
pub fn parse_tour_sequence(sequence: &str) -> Result<Vec<usize>> {
    let values: Vec<usize> = sequence
        .split(',')
        .map(|token| {
            token
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::Validation(format!("invalid tour value: {:?}", token.trim())))
        })
        .collect::<Result<_>>()?;

    if values.len() < 2 {
        return Err(Error::Validation(
            "tour sequence needs at least one preset and a dwell".to_string(),
        ));
    }

    for &index in &values[..values.len() - 1] {
        if index >= RANCH_PRESET_SLOTS {
            return Err(Error::Validation(format!(
                "tour preset {} out of range (0..{})",
                index, RANCH_PRESET_SLOTS
            )));
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tour_sequence() {
        assert_eq!(parse_tour_sequence("1,2,3,10").unwrap(), vec![1, 2, 3, 10]);
        assert_eq!(parse_tour_sequence(" 4 , 5 ").unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_parse_tour_sequence_minimum_two_values() {
        // One preset plus one dwell is the smallest valid tour
        assert!(parse_tour_sequence("3,60").is_ok());
        assert!(matches!(
            parse_tour_sequence("3"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(parse_tour_sequence(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_tour_sequence_rejects_garbage() {
        assert!(matches!(
            parse_tour_sequence("1,two,3"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_tour_sequence_rejects_out_of_range_preset() {
        // 32 is past the last ranch slot; dwell values are unconstrained
        assert!(parse_tour_sequence("32,10").is_err());
        assert!(parse_tour_sequence("31,600").is_ok());
    }
}
