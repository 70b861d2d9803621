//! PTY session: one child process behind a pseudo-terminal.
//!
//! The session hands out three things: an input sink (serialized writes into
//! the child's terminal), a single ordered stream of [`SessionEvent`]s (raw
//! output chunks followed by the exit notification), and a kill switch.
//! The [`Session`] trait captures exactly that surface so the console agent
//! can be driven by a scripted session in tests.

#[cfg(test)]
pub mod fake;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default terminal geometry.
pub const DEFAULT_COLS: u16 = 128;
pub const DEFAULT_ROWS: u16 = 64;

const READ_BUFFER_SIZE: usize = 4096;

/// How long the exit notification waits for the reader to hit EOF. A
/// background process still holding the terminal open would otherwise keep
/// `Exited` back forever.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Event sender shared by the reader and waiter threads. The waiter takes it
/// when it reports the exit, which closes the stream for the reader too.
type SharedSender = Arc<Mutex<Option<Sender<SessionEvent>>>>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open PTY: {0}")]
    Open(String),
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    #[error("session input is closed (child exited)")]
    Closed,
    #[error("failed to write to PTY: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to kill child process: {0}")]
    Kill(String),
}

/// Configuration for spawning the console process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// The program to execute (e.g. "/bin/bash").
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// Working directory; `None` keeps the current directory.
    pub work_dir: Option<String>,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".to_string(),
            args: vec![],
            work_dir: None,
            env: vec![],
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    pub code: u32,
    pub signal: Option<String>,
}

impl ChildExit {
    pub fn with_code(code: u32) -> Self {
        Self { code, signal: None }
    }

    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

impl From<portable_pty::ExitStatus> for ChildExit {
    fn from(status: portable_pty::ExitStatus) -> Self {
        Self {
            code: status.exit_code(),
            signal: status.signal().map(str::to_string),
        }
    }
}

/// Events produced by a running session, in the order the child produced them.
///
/// All output read before the terminal reached EOF is delivered ahead of
/// `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A raw output chunk. Partial lines are normal.
    Output(Vec<u8>),
    /// The child exited. No further events follow.
    Exited(ChildExit),
}

/// Write side of a session.
///
/// Each call is delivered as one uninterrupted write; concurrent callers are
/// serialized.
pub trait InputSink: Send + Sync {
    fn write_input(&self, bytes: &[u8]) -> Result<(), SessionError>;
}

/// The surface the console agent needs from a child session.
pub trait Session: Send {
    fn input(&self) -> Arc<dyn InputSink>;

    /// The event stream. Available once; later calls return `None`.
    fn take_events(&mut self) -> Option<Receiver<SessionEvent>>;

    /// Forcefully terminate the child. Killing an exited child is a no-op.
    fn kill(&self) -> Result<(), SessionError>;
}

/// Mutex-guarded PTY writer that refuses writes once the child has exited.
pub struct PtyWriter {
    writer: Mutex<Box<dyn Write + Send>>,
    closed: Arc<AtomicBool>,
}

impl InputSink for PtyWriter {
    fn write_input(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let mut writer = self.writer.lock().map_err(|_| SessionError::Closed)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }
}

/// A live child process attached to a pseudo-terminal.
pub struct PtySession {
    // Dropping the master closes the terminal; keep it for the session's life.
    _master: Box<dyn MasterPty + Send>,
    input: Arc<PtyWriter>,
    events: Option<Receiver<SessionEvent>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl PtySession {
    /// Spawn `config.program` in a fresh PTY.
    ///
    /// The child inherits this process's environment, with `TERM=xterm` and
    /// `config.env` layered on top.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, SessionError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.program);
        for arg in &config.args {
            cmd.arg(arg);
        }
        match &config.work_dir {
            Some(dir) => cmd.cwd(dir),
            None => {
                if let Ok(cwd) = std::env::current_dir() {
                    cmd.cwd(cwd);
                }
            }
        }
        cmd.env("TERM", "xterm");
        for (key, val) in &config.env {
            cmd.env(key, val);
        }

        info!(
            program = %config.program,
            args = ?config.args,
            cols = config.cols,
            rows = config.rows,
            "spawning console in PTY"
        );

        let spawn_err = |reason: String| SessionError::Spawn {
            program: config.program.clone(),
            reason,
        };

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(e.to_string()))?;

        // Only the master side is used from here on.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(format!("failed to take PTY writer: {e}")))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let exited = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let tx: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let reader_done = spawn_reader(reader, tx.clone());

        let exited_flag = exited.clone();
        thread::spawn(move || {
            let exit = match child.wait() {
                Ok(status) => ChildExit::from(status),
                Err(e) => {
                    warn!("failed to wait for console process: {e}");
                    ChildExit::with_code(1)
                }
            };
            exited_flag.store(true, Ordering::SeqCst);
            info!(code = exit.code, signal = ?exit.signal, "console process exited");

            // The reader drops its end of `reader_done` at EOF.
            if let Err(mpsc::RecvTimeoutError::Timeout) =
                reader_done.recv_timeout(EXIT_DRAIN_TIMEOUT)
            {
                warn!("PTY still open {EXIT_DRAIN_TIMEOUT:?} after exit; reporting exit anyway");
            }
            let sender = match tx.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(sender) = sender {
                let _ = sender.send(SessionEvent::Exited(exit));
            }
        });

        Ok(Self {
            _master: pair.master,
            input: Arc::new(PtyWriter {
                writer: Mutex::new(writer),
                closed: exited.clone(),
            }),
            events: Some(rx),
            killer: Mutex::new(killer),
            exited,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// Forward PTY output until EOF. The returned receiver disconnects when the
/// reader stops.
fn spawn_reader(mut reader: Box<dyn Read + Send>, tx: SharedSender) -> Receiver<()> {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        let _done = done_tx;
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break, // EOF: the child closed the terminal
                Ok(n) => n,
                Err(e) => {
                    debug!("PTY read error (process likely exited): {e}");
                    break;
                }
            };
            let Ok(guard) = tx.lock() else { break };
            // `None` once the exit has been reported.
            let delivered = guard
                .as_ref()
                .is_some_and(|tx| tx.send(SessionEvent::Output(buf[..n].to_vec())).is_ok());
            if !delivered {
                break;
            }
        }
    });
    done_rx
}

impl Session for PtySession {
    fn input(&self) -> Arc<dyn InputSink> {
        self.input.clone()
    }

    fn take_events(&mut self) -> Option<Receiver<SessionEvent>> {
        self.events.take()
    }

    fn kill(&self) -> Result<(), SessionError> {
        if self.has_exited() {
            return Ok(());
        }
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| SessionError::Kill("killer lock poisoned".to_string()))?;
        match killer.kill() {
            Ok(()) => Ok(()),
            // Lost the race with a natural exit.
            Err(_) if self.has_exited() => Ok(()),
            Err(e) => Err(SessionError::Kill(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collect_until_exit(rx: &Receiver<SessionEvent>) -> (Vec<u8>, ChildExit) {
        let mut output = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                SessionEvent::Output(chunk) => output.extend(chunk),
                SessionEvent::Exited(exit) => return (output, exit),
            }
        }
    }

    fn sh(script: &str) -> SpawnConfig {
        SpawnConfig {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            work_dir: Some("/tmp".to_string()),
            ..SpawnConfig::default()
        }
    }

    #[test]
    fn default_spawn_config_uses_fixed_geometry() {
        let config = SpawnConfig::default();
        assert_eq!(config.cols, 128);
        assert_eq!(config.rows, 64);
        assert_eq!(config.program, "/bin/bash");
    }

    #[test]
    fn child_exit_success_requires_zero_and_no_signal() {
        assert!(ChildExit::with_code(0).success());
        assert!(!ChildExit::with_code(1).success());
        let signalled = ChildExit {
            code: 0,
            signal: Some("Terminated".to_string()),
        };
        assert!(!signalled.success());
    }

    #[test]
    fn spawn_missing_program_fails() {
        let config = SpawnConfig {
            program: "/nonexistent/definitely-not-a-shell".to_string(),
            ..SpawnConfig::default()
        };
        let err = PtySession::spawn(&config).err().expect("spawn should fail");
        assert!(matches!(err, SessionError::Spawn { .. }));
    }

    #[test]
    fn echoes_output_and_reports_exit_code() {
        let mut session = PtySession::spawn(&sh("printf 'hello from pty'; exit 3")).unwrap();
        let rx = session.take_events().unwrap();
        assert!(session.take_events().is_none());

        let (output, exit) = collect_until_exit(&rx);
        assert!(String::from_utf8_lossy(&output).contains("hello from pty"));
        assert_eq!(exit.code, 3);
        assert!(!exit.success());
    }

    #[test]
    fn trailing_output_arrives_before_exit() {
        let script = "head -c 200000 /dev/zero | tr '\\0' a; printf 'END-OF-OUTPUT'; exit 0";
        for _ in 0..10 {
            let mut session = PtySession::spawn(&sh(script)).unwrap();
            let rx = session.take_events().unwrap();
            let (output, exit) = collect_until_exit(&rx);
            assert!(exit.success());
            assert!(
                String::from_utf8_lossy(&output).ends_with("END-OF-OUTPUT"),
                "last output chunk was reported after exit"
            );
            // The stream is closed once the exit is out.
            assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        }
    }

    #[test]
    fn input_reaches_child() {
        let mut session = PtySession::spawn(&sh("read line; printf 'got:%s' \"$line\"")).unwrap();
        let rx = session.take_events().unwrap();
        session.input().write_input(b"ping\r").unwrap();

        let (_, exit) = collect_until_exit(&rx);
        assert!(exit.success());
    }

    #[test]
    fn writes_after_exit_fail_cleanly() {
        let mut session = PtySession::spawn(&sh("exit 0")).unwrap();
        let rx = session.take_events().unwrap();
        let (_, exit) = collect_until_exit(&rx);
        assert!(exit.success());

        let err = session.input().write_input(b"ls\r").unwrap_err();
        assert!(matches!(err, SessionError::Closed));
        // Killing an exited child is not an error.
        session.kill().unwrap();
    }

    #[test]
    fn kill_terminates_long_running_child() {
        let mut session = PtySession::spawn(&sh("sleep 30")).unwrap();
        let rx = session.take_events().unwrap();
        session.kill().unwrap();

        let (_, exit) = collect_until_exit(&rx);
        assert!(!exit.success());
        assert!(exit.signal.is_some(), "expected a signal, got {exit:?}");
        assert!(session.has_exited());
    }

    #[test]
    fn signal_status_converts_to_child_exit() {
        let exit = ChildExit::from(portable_pty::ExitStatus::with_signal("Terminated"));
        assert_eq!(exit.signal.as_deref(), Some("Terminated"));
        assert!(!exit.success());

        let exit = ChildExit::from(portable_pty::ExitStatus::with_exit_code(0));
        assert_eq!(exit, ChildExit::with_code(0));
    }
}
