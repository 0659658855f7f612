//! Decoupled logging pipeline for validation sessions.
//!
//! Every `log::*!` call is turned into a `LogLine` and pushed over an unbounded
//! crossbeam channel to a dedicated OS thread that owns the files. Workload
//! tasks never block on disk I/O, and lines emitted from any tokio worker (or a
//! plain thread) all land in the same place.
//!
//! ```text
//! log::info!(...) / log_parsed!(...)
//!     |
//! [LogCollector]  (non-blocking send)
//!     | crossbeam unbounded
//!     v
//! [disk writer thread]
//!     |-> logs/full/<ts>_full.log      (every line)
//!     '-> logs/parsed/<ts>_parsed.log  (milestones, target = "parsed")
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Emit a milestone line (phase start/finish, abort, verdict) on the
/// `parsed` target so it also reaches the condensed log.
#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::info!(target: "parsed", "{}", msg);
    }}
}

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the writer acknowledges once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    Full,
    Parsed,
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    /// Wall-clock time the line was created (HH:MM:SS.mmm)
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            kind: LogKind::Full,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            kind: LogKind::Parsed,
            ..LogLine::new(message)
        }
    }
}

/// Process logger: `log::Log` front end plus a background disk writer.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    full_path: PathBuf,
    parsed_path: PathBuf,
    echo_to_stderr: bool,
}

impl LogCollector {
    /// Create the `full/` and `parsed/` directories under `log_dir`, open this
    /// run's files and start the writer thread.
    pub fn new(log_dir: PathBuf, echo_to_stderr: bool) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let parsed_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let full_path = full_dir.join(format!("{}_full.log", stamp));
        let parsed_path = parsed_dir.join(format!("{}_parsed.log", stamp));

        let mut full_file = open_append(&full_path)?;
        let mut parsed_file = open_append(&parsed_path)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread rather than a tokio task: it must keep draining even while
        // the runtime is shutting down.
        std::thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            let formatted = format!("[{}] {}\n", line.timestamp, line.message);
                            let _ = full_file.write_all(formatted.as_bytes());
                            if line.kind == LogKind::Parsed {
                                let _ = parsed_file.write_all(formatted.as_bytes());
                            }
                        }
                        LogMessage::Flush(ack) => {
                            let _ = full_file.flush();
                            let _ = parsed_file.flush();
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| format!("Failed to spawn log writer thread: {}", e))?;

        Ok(LogCollector {
            tx,
            log_dir,
            full_path,
            parsed_path,
            echo_to_stderr,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn full_log_path(&self) -> &Path {
        &self.full_path
    }

    pub fn parsed_log_path(&self) -> &Path {
        &self.parsed_path
    }

    /// Queue a line; never blocks and never fails (unbounded channel).
    pub fn log(&self, line: LogLine) {
        if self.echo_to_stderr {
            eprintln!("{}", line.message);
        }
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_line(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    /// Block until every line queued before this call has been written.
    pub fn flush(&self) -> Result<(), String> {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(ack_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        ack_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Register a clone of this collector as the global `log` backend.
    pub fn install(&self, max_level: LevelFilter) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| format!("Logger already installed: {}", e))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == "parsed" {
            self.log_parsed(message);
        } else {
            self.log_line(message);
        }
    }

    fn flush(&self) {
        let _ = LogCollector::flush(self);
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}
