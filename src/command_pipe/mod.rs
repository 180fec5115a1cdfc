//! CommandPipe - named-FIFO control surface
//!
//! ## Responsibilities
//!
//! - Create the FIFO (mode 0666, stale node replaced)
//! - Read line-framed commands on a blocking worker and dispatch each
//!   trimmed, non-empty line to the registered callback exactly once
//! - Reopen after the writer side closes (0-byte read)
//! - Unblock the worker on shutdown by writing a newline from the closer
//!
//! The initial non-blocking probe open lets startup succeed whether or not
//! a writer is attached yet; the worker then holds a blocking descriptor.

use crate::error::{Error, Result};
use nix::sys::stat::Mode;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Callback invoked once per complete command line
pub type CommandCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Named-FIFO command reader
pub struct CommandPipe {
    path: PathBuf,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CommandPipe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the FIFO and start the reader worker
    pub fn open(&mut self, callback: CommandCallback) -> Result<()> {
        create_fifo(&self.path)?;

        // Succeeds regardless of writer presence; the worker reopens blocking
        let probe = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        drop(probe);

        self.running.store(true, Ordering::Release);

        let path = self.path.clone();
        let running = Arc::clone(&self.running);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            read_loop(&path, &running, callback);
        }));

        tracing::info!(path = %self.path.display(), "Command pipe opened");
        Ok(())
    }

    /// Stop the worker and wait for it to exit
    pub async fn close(&mut self) {
        self.running.store(false, Ordering::Release);

        // O_RDWR never blocks on a FIFO, so this wake succeeds even while
        // the worker is still waiting for a writer in open()
        if let Ok(mut wake) = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
        {
            let _ = wake.write_all(b"\n");
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        tracing::info!(path = %self.path.display(), "Command pipe closed");
    }

    /// Write one command into a pipe (external-tool helper).
    ///
    /// Fails with `ENXIO` when nothing is reading.
    pub fn send_command(path: impl AsRef<Path>, command: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path.as_ref())?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn create_fifo(path: &Path) -> Result<()> {
    let _ = std::fs::remove_file(path);

    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Command pipe created");
            Ok(())
        }
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(e) => Err(Error::Io(std::io::Error::from(e))),
    }
}

fn read_loop(path: &Path, running: &AtomicBool, callback: CommandCallback) {
    let mut pending = Vec::new();

    'reopen: while running.load(Ordering::Acquire) {
        // Blocks until a writer attaches
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to reopen command pipe");
                return;
            }
        };

        let mut buf = [0u8; 1024];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    // Writer closed; reopen for the next one
                    continue 'reopen;
                }
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    dispatch_lines(&mut pending, &callback);
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Command pipe read error");
                    return;
                }
            }
        }
    }
}

fn dispatch_lines(pending: &mut Vec<u8>, callback: &CommandCallback) {
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let command = String::from_utf8_lossy(&line[..line.len() - 1]);
        let command = command.trim();
        if command.is_empty() {
            continue;
        }
        tracing::info!(command = %command, "Command received");
        callback(command);
    }
}
