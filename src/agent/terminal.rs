//! Operator terminal plumbing: raw mode and stdin forwarding.

use std::io::{IsTerminal, Read};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, warn};

/// Restores cooked mode when dropped.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Switch the controlling terminal to raw mode, if stdin is one.
    ///
    /// Returns `None` when stdin is not a terminal (pipes, CI); the caller
    /// then relies on a Ctrl-C handler instead.
    pub fn enable_if_tty() -> Result<Option<Self>> {
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal; leaving terminal mode alone");
            return Ok(None);
        }
        enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Some(Self { _private: () }))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("failed to restore terminal mode: {e}");
        }
    }
}

/// Read operator keystrokes on a background thread.
///
/// The thread blocks on stdin for the life of the process; the receiver sees
/// raw byte chunks exactly as read.
pub fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdin_lock = stdin.lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin_lock.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}
