//! SerialLink - framed byte I/O to the PTZ head
//!
//! ## Responsibilities
//!
//! - Own the serial port (8N1, configurable baud rate)
//! - Serialize access behind a single mutex
//! - Timed reads for command acknowledgements
//!
//! Calls block; the PTZ controller runs them on the blocking pool.

use crate::error::{Error, Result};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::Read;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Mutex-guarded serial line
pub struct SerialLink {
    device: String,
    port: Mutex<Box<dyn SerialPort>>,
}

impl SerialLink {
    /// Open `device` at `baudrate`, 8N1
    pub fn open(device: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(device, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                Error::ConnectFailed(format!("serial port {}: {}", device, e))
            })?;

        tracing::info!(device = %device, baudrate, "Serial port opened");

        Ok(Self {
            device: device.to_string(),
            port: Mutex::new(port),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Write the whole frame
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut port = self.port.lock().expect("serial mutex poisoned");
        port.write_all(data)?;
        port.flush()?;

        if data.len() < 64 {
            tracing::debug!(device = %self.device, tx = %hex_dump(data), "Serial TX");
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes, giving up at the deadline.
    ///
    /// Returns the number of bytes read; 0 means the timeout expired with
    /// nothing on the wire.
    pub fn read_with_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut port = self.port.lock().expect("serial mutex poisoned");
        let deadline = Instant::now() + timeout;
        let mut total = 0usize;

        while total < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)
                .map_err(|e| Error::Internal(format!("serial timeout: {}", e)))?;

            match port.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total > 0 && total < 64 {
            tracing::debug!(device = %self.device, rx = %hex_dump(&buf[..total]), "Serial RX");
        }

        Ok(total)
    }
}

/// Space-separated uppercase hex, matching the head vendor's documentation
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x96, 0x00, 0xC6]), "96 00 C6");
        assert_eq!(hex_dump(&[]), "");
    }
}
