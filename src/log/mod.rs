//! Structured execution log: JSON lines per console session.
//!
//! Each line is a self-contained JSON object with an RFC 3339 timestamp, the
//! id of the session that wrote it, and one [`LogEvent`]. The agent only ever
//! appends; nothing in this crate reads the log back. The full context sent
//! with each generation request is recorded so a session can be replayed and
//! audited afterwards.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// One line of the log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub session_id: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// What happened. Serialized as `{"event": name, "data": {...}}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The console process was spawned.
    SessionStarted {
        program: String,
        provider: String,
    },
    /// The console went idle and its context was submitted for generation.
    GenerationRequested { provider: String, context: String },
    /// The fragment stream ran to completion.
    GenerationFinished { fragments: usize, bytes: usize },
    /// The generation failed or was abandoned.
    GenerationFailed { reason: String },
    /// An idle trigger arrived while a generation was still streaming.
    TriggerDeferred,
    /// Operator keystrokes were forwarded to the console.
    UserInput { length: usize },
    /// The session ended.
    SessionEnded { result: String },
}

/// Append-only JSONL sink shared by the agent loop and its helper threads.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    session_id: String,
}

impl ExecutionLog {
    /// Open `path` for appending, creating missing directories. Every log
    /// opened gets a fresh session id.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
            session_id: Uuid::new_v4().to_string(),
        })
    }

    /// Append one event and flush it.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: self.session_id.clone(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;
        debug!(bytes = json.len(), "execution log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("execution log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
