//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everything else sends
//! [`ActivityEvent`]s through a bounded crossbeam channel with `try_send`, so a
//! slow disk never stalls a request handler or a cleanup walk.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, WstError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Which measured size an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Container,
    Workspace,
}

impl Dimension {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Workspace => "workspace",
        }
    }
}

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ServerStarted {
        version: String,
        config_hash: String,
        bind: String,
    },
    ServerStopped {
        uptime_secs: u64,
    },
    StorageChecked {
        refresh_started: bool,
        container_warning: bool,
        workspace_warning: bool,
    },
    SizeLimitExceeded {
        dimension: Dimension,
        size_kb: u64,
        limit_gb: u64,
    },
    UsageMeasured {
        dimension: Dimension,
        path: PathBuf,
        size_kb: u64,
        duration_ms: u64,
    },
    MeasurementFailed {
        dimension: Dimension,
        path: PathBuf,
        error_code: String,
        error_message: String,
    },
    FileRemoved {
        path: PathBuf,
        size_kb: u64,
        inactive_days: Option<u64>,
        tombstone: bool,
    },
    FileRemovalFailed {
        path: PathBuf,
        error_code: String,
        error_message: String,
    },
    CleanupCompleted {
        folder: PathBuf,
        files_removed: u64,
        megabytes_freed: u64,
        failures: u64,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Asks the logger thread to flush and exit.
    Shutdown,
}

/// Cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event without blocking. A full channel drops the event and
    /// bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to drain and exit. Blocks only until the sentinel
    /// is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            jsonl: JsonlConfig::at(path),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread.
///
/// The thread exits after [`ActivityLoggerHandle::shutdown`] or once every
/// handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("wst-logger".to_string())
        .spawn(move || run_logger(&rx, jsonl, &dropped))
        .map_err(|error| WstError::Runtime {
            details: format!("failed to spawn logger thread: {error}"),
        })?;

    Ok((handle, join))
}

fn run_logger(rx: &Receiver<ActivityEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warning = LogEntry::new(EventType::Error, Severity::Warning);
            warning.details = Some(format!("{lost} activity events dropped under back-pressure"));
            writer.write_entry(&warning);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        if let Some(entry) = to_log_entry(&event) {
            writer.write_entry(&entry);
        }
    }

    writer.fsync();
}

fn path_string(path: &std::path::Path) -> Option<String> {
    Some(path.display().to_string())
}

#[allow(clippy::too_many_lines)]
fn to_log_entry(event: &ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::ServerStarted {
            version,
            config_hash,
            bind,
        } => {
            let mut e = LogEntry::new(EventType::ServerStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} bind={bind}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ServerStopped { uptime_secs } => {
            let mut e = LogEntry::new(EventType::ServerStop, Severity::Info);
            e.duration_ms = Some(uptime_secs.saturating_mul(1000));
            e.ok = Some(true);
            e
        }
        ActivityEvent::StorageChecked {
            refresh_started,
            container_warning,
            workspace_warning,
        } => {
            let warned = *container_warning || *workspace_warning;
            let mut e = LogEntry::new(
                EventType::StorageCheck,
                if warned {
                    Severity::Warning
                } else {
                    Severity::Info
                },
            );
            e.details = Some(format!(
                "refresh_started={refresh_started} container_warning={container_warning} \
                 workspace_warning={workspace_warning}"
            ));
            e
        }
        ActivityEvent::SizeLimitExceeded {
            dimension,
            size_kb,
            limit_gb,
        } => {
            let mut e = LogEntry::new(EventType::SizeLimitExceeded, Severity::Warning);
            e.dimension = Some(dimension.as_str().to_string());
            e.size_kb = Some(*size_kb);
            e.limit = Some(*limit_gb);
            e
        }
        ActivityEvent::UsageMeasured {
            dimension,
            path,
            size_kb,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::UsageMeasured, Severity::Info);
            e.dimension = Some(dimension.as_str().to_string());
            e.path = path_string(path);
            e.size_kb = Some(*size_kb);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::MeasurementFailed {
            dimension,
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::MeasurementFailed, Severity::Warning);
            e.dimension = Some(dimension.as_str().to_string());
            e.path = path_string(path);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::FileRemoved {
            path,
            size_kb,
            inactive_days,
            tombstone,
        } => {
            let mut e = LogEntry::new(EventType::FileRemoved, Severity::Info);
            e.path = path_string(path);
            e.size_kb = Some(*size_kb);
            e.details = Some(match inactive_days {
                Some(days) => format!("inactive_days={days} tombstone={tombstone}"),
                None => format!("inactive_days=unknown tombstone={tombstone}"),
            });
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileRemovalFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::FileRemovalFailed, Severity::Warning);
            e.path = path_string(path);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::CleanupCompleted {
            folder,
            files_removed,
            megabytes_freed,
            failures,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CleanupComplete, Severity::Info);
            e.path = path_string(folder);
            e.files = Some(*files_removed);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("megabytes_freed={megabytes_freed} failures={failures}"));
            e.ok = Some(*failures == 0);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}

/// Forward an event when a logger is attached.
pub fn emit(logger: Option<&ActivityLoggerHandle>, event: ActivityEvent) {
    if let Some(handle) = logger {
        handle.send(event);
    }
}
