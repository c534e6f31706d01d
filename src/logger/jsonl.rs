//! Append-only JSONL activity log.
//!
//! Every event is one self-contained JSON object on its own line, written with a
//! single `write_all` so a concurrent `tail -f` never sees half a record.
//!
//! When the primary file cannot be written the writer degrades in order:
//! fallback file, then stderr lines prefixed `[WST-JSONL]`, then silent discard.
//! Logging must never fail a request or a cleanup run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WstError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event kinds recorded by workspace tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServerStart,
    ServerStop,
    StorageCheck,
    SizeLimitExceeded,
    UsageMeasured,
    MeasurementFailed,
    FileRemoved,
    FileRemovalFailed,
    CleanupComplete,
    Error,
}

/// One log line. Optional fields are omitted from the JSON when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// `container` or `workspace` for storage events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            path: None,
            dimension: None,
            size_kb: None,
            limit: None,
            files: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would grow past this many bytes.
    pub max_size_bytes: u64,
    /// Rotated generations kept next to the live file (`.1` is the newest).
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    /// Defaults for a log living at `path`.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            fallback_path: Some(std::env::temp_dir().join("wst-activity.jsonl")),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// Where lines currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }
}

/// Size-rotated JSONL writer with a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    file: Option<BufWriter<File>>,
    file_len: u64,
    last_sync: Instant,
}

impl JsonlWriter {
    /// Open the primary file, degrading immediately if that fails.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Primary,
            file: None,
            file_len: 0,
            last_sync: Instant::now(),
        };
        writer.open_current_sink();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(error) => {
                let _ = writeln!(io::stderr(), "[WST-JSONL] serialize error: {error}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    /// Current sink name: `primary`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::Primary => "primary",
            Sink::Fallback => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        loop {
            match self.sink {
                Sink::Primary | Sink::Fallback => {
                    if self.file_len + len > self.config.max_size_bytes {
                        self.rotate();
                    }
                    let Some(file) = self.file.as_mut() else {
                        self.degrade();
                        continue;
                    };
                    if file.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        continue;
                    }
                    self.file_len += len;
                    if self.last_sync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                        self.fsync();
                    }
                    return;
                }
                Sink::Stderr => {
                    let _ = write!(io::stderr(), "[WST-JSONL] {line}");
                    return;
                }
                Sink::Discard => return,
            }
        }
    }

    fn current_path(&self) -> Option<&Path> {
        match self.sink {
            Sink::Primary => Some(&self.config.path),
            Sink::Fallback => self.config.fallback_path.as_deref(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    /// Open the file for the current sink, stepping down the chain until one works.
    fn open_current_sink(&mut self) {
        while matches!(self.sink, Sink::Primary | Sink::Fallback) {
            let Some(path) = self.current_path().map(Path::to_path_buf) else {
                self.sink = self.sink.next();
                continue;
            };
            match open_append(&path) {
                Ok((file, len)) => {
                    if self.sink == Sink::Fallback {
                        let _ = writeln!(
                            io::stderr(),
                            "[WST-JSONL] primary log unavailable, using {}",
                            path.display()
                        );
                    }
                    self.file = Some(BufWriter::new(file));
                    self.file_len = len;
                    return;
                }
                Err(_) => self.sink = self.sink.next(),
            }
        }
        if self.sink == Sink::Stderr {
            let _ = writeln!(io::stderr(), "[WST-JSONL] no writable log file, using stderr");
        }
    }

    fn degrade(&mut self) {
        self.file = None;
        self.sink = self.sink.next();
        self.open_current_sink();
    }

    fn rotate(&mut self) {
        self.flush();
        self.file = None;
        let Some(base) = self.current_path().map(Path::to_path_buf) else {
            return;
        };

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(
                rotated_name(&base, generation),
                rotated_name(&base, generation + 1),
            );
        }
        if keep > 0 {
            let _ = fs::rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.file = Some(BufWriter::new(file));
                self.file_len = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| WstError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| WstError::io(path, source))?;
    let len = file.metadata().map_or(0, |meta| meta.len());
    Ok((file, len))
}

/// `activity.jsonl` -> `activity.jsonl.2`
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}
