//! Policy-driven folder cleanup: remove large, inactive files and leave a
//! `<file>.removed.txt` tombstone explaining why.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::CleanupConfig;
use crate::core::errors::{Result, WstError};
use crate::core::paths::paths_overlap;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, emit};
use crate::monitor::measure::UsageMeasurer;
use crate::monitor::metadata::UsageSnapshot;
use crate::scanner::walker::{FileEntry, FolderWalker};

const MIB: u64 = 1024 * 1024;
const SECS_PER_DAY: u64 = 24 * 60 * 60;
/// Suffix of tombstone files; such files are never removed.
pub const TOMBSTONE_SUFFIX: &str = ".removed.txt";

/// Parameters of one cleanup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub folder: PathBuf,
    /// Files smaller than this are kept. `None` or 0 disables the size gate.
    pub max_file_size_mb: Option<u64>,
    /// Files used within this many days are kept. 0 disables the age gate.
    pub min_inactivity_days: u64,
    pub replace_with_tombstone: bool,
    /// Directory names pruned anywhere below `folder`.
    pub excluded_folder_names: Vec<String>,
}

impl CleanupPolicy {
    /// Policy with the built-in defaults: 50 MB, 3 days, tombstones on.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self::from_config(folder, &CleanupConfig::default())
    }

    #[must_use]
    pub fn from_config(folder: impl Into<PathBuf>, config: &CleanupConfig) -> Self {
        Self {
            folder: folder.into(),
            max_file_size_mb: config.max_file_size_mb,
            min_inactivity_days: config.min_inactivity_days,
            replace_with_tombstone: config.replace_with_tombstone,
            excluded_folder_names: config.excluded_folder_names.clone(),
        }
    }

    fn size_gate(&self) -> Option<u64> {
        self.max_file_size_mb.filter(|max| *max > 0)
    }
}

/// A path the cleanup could not act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error_code: String,
    pub message: String,
}

impl CleanupFailure {
    fn from_error(path: &Path, error: &WstError) -> Self {
        Self {
            path: path.to_path_buf(),
            error_code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub folder: PathBuf,
    pub files_visited: u64,
    pub files_removed: u64,
    /// Sum of the truncated per-file MB sizes.
    pub megabytes_freed: u64,
    pub failures: Vec<CleanupFailure>,
    /// Files that were removed but whose tombstone could not be written.
    pub tombstone_failures: Vec<CleanupFailure>,
    /// Snapshot written after the run; `None` when no refresh ran or it failed.
    pub metadata: Option<UsageSnapshot>,
    pub duration_ms: u64,
}

/// Why a file qualified for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    size_mb: u64,
    inactive_days: Option<u64>,
}

static ACTIVE_CLEANUPS: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

/// Advisory process-wide lock on a folder tree. Released on drop.
#[derive(Debug)]
pub struct CleanupLock {
    folder: PathBuf,
}

impl CleanupLock {
    /// Fails with `CleanupInProgress` if an overlapping folder is being cleaned.
    pub fn acquire(folder: &Path) -> Result<Self> {
        let mut active = ACTIVE_CLEANUPS.lock();
        if active.iter().any(|held| paths_overlap(held, folder)) {
            return Err(WstError::CleanupInProgress {
                path: folder.to_path_buf(),
            });
        }
        active.push(folder.to_path_buf());
        Ok(Self {
            folder: folder.to_path_buf(),
        })
    }
}

impl Drop for CleanupLock {
    fn drop(&mut self) {
        let mut active = ACTIVE_CLEANUPS.lock();
        if let Some(index) = active.iter().position(|held| held == &self.folder) {
            active.swap_remove(index);
        }
    }
}

pub struct CleanupEngine {
    measurer: Option<Arc<UsageMeasurer>>,
    logger: Option<ActivityLoggerHandle>,
}

impl CleanupEngine {
    /// `measurer` refreshes the usage snapshot after each run when set.
    #[must_use]
    pub fn new(measurer: Option<Arc<UsageMeasurer>>, logger: Option<ActivityLoggerHandle>) -> Self {
        Self { measurer, logger }
    }

    pub fn cleanup(&self, policy: &CleanupPolicy) -> Result<CleanupReport> {
        self.cleanup_at(policy, SystemTime::now())
    }

    /// Run `policy` judging file ages against `now`.
    pub fn cleanup_at(&self, policy: &CleanupPolicy, now: SystemTime) -> Result<CleanupReport> {
        let started = Instant::now();
        let root = fs::canonicalize(&policy.folder)
            .map_err(|source| WstError::io(&policy.folder, source))?;
        let _lock = CleanupLock::acquire(&root)?;

        let removal_date = chrono::DateTime::<chrono::Local>::from(now)
            .format("%B %d, %Y")
            .to_string();
        let mut report = CleanupReport {
            folder: policy.folder.clone(),
            files_visited: 0,
            files_removed: 0,
            megabytes_freed: 0,
            failures: Vec::new(),
            tombstone_failures: Vec::new(),
            metadata: None,
            duration_ms: 0,
        };

        let walker = FolderWalker::new(&root).excluding(policy.excluded_folder_names.iter().cloned());
        let stats = walker.walk(|entry| {
            let Some(candidate) = evaluate(entry, policy, now) else {
                return;
            };
            let reason = removal_reason(policy, &removal_date, candidate);
            self.remove(entry, candidate, &reason, policy.replace_with_tombstone, &mut report);
        })?;
        report.files_visited = stats.files;

        if let Some(measurer) = &self.measurer {
            match measurer.refresh() {
                Ok(snapshot) => report.metadata = Some(snapshot),
                Err(error) => {
                    eprintln!("[WST-CLEANUP] usage refresh after cleanup failed: {error}");
                    emit(
                        self.logger.as_ref(),
                        ActivityEvent::Error {
                            code: error.code().to_string(),
                            message: error.to_string(),
                        },
                    );
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        emit(
            self.logger.as_ref(),
            ActivityEvent::CleanupCompleted {
                folder: policy.folder.clone(),
                files_removed: report.files_removed,
                megabytes_freed: report.megabytes_freed,
                failures: report.failures.len() as u64,
                duration_ms: report.duration_ms,
            },
        );
        Ok(report)
    }

    fn remove(
        &self,
        entry: &FileEntry,
        candidate: Candidate,
        reason: &str,
        tombstone: bool,
        report: &mut CleanupReport,
    ) {
        if let Err(source) = fs::remove_file(&entry.path) {
            let error = WstError::io(&entry.path, source);
            self.record_failure(&entry.path, &error, report);
            return;
        }

        report.files_removed += 1;
        report.megabytes_freed += candidate.size_mb;
        emit(
            self.logger.as_ref(),
            ActivityEvent::FileRemoved {
                path: entry.path.clone(),
                size_kb: entry.size_bytes / 1024,
                inactive_days: candidate.inactive_days,
                tombstone,
            },
        );

        if tombstone {
            let marker = tombstone_path(&entry.path);
            // The file is already gone; a missing marker does not fail the run.
            if let Err(source) = fs::write(&marker, reason) {
                let error = WstError::io(&marker, source);
                eprintln!("[WST-CLEANUP] tombstone not written: {error}");
                emit(
                    self.logger.as_ref(),
                    ActivityEvent::Error {
                        code: error.code().to_string(),
                        message: format!("tombstone not written: {error}"),
                    },
                );
                report.tombstone_failures.push(CleanupFailure::from_error(&marker, &error));
            }
        }
    }

    fn record_failure(&self, path: &Path, error: &WstError, report: &mut CleanupReport) {
        eprintln!("[WST-CLEANUP] {error}");
        emit(
            self.logger.as_ref(),
            ActivityEvent::FileRemovalFailed {
                path: path.to_path_buf(),
                error_code: error.code().to_string(),
                error_message: error.to_string(),
            },
        );
        report.failures.push(CleanupFailure::from_error(path, error));
    }
}

/// `<file>.removed.txt`
#[must_use]
pub fn tombstone_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(TOMBSTONE_SUFFIX);
    PathBuf::from(name)
}

fn is_tombstone(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(TOMBSTONE_SUFFIX))
}

/// Both gates must pass. Unknown age passes the age gate; a last use in the
/// future never does.
fn evaluate(entry: &FileEntry, policy: &CleanupPolicy, now: SystemTime) -> Option<Candidate> {
    if is_tombstone(&entry.path) {
        return None;
    }

    let size_mb = entry.size_bytes / MIB;
    if policy.size_gate().is_some_and(|max| size_mb < max) {
        return None;
    }

    let inactive_days = match entry.last_used {
        Some(last_used) => Some(now.duration_since(last_used).ok()?.as_secs() / SECS_PER_DAY),
        None => None,
    };
    if policy.min_inactivity_days > 0
        && inactive_days.is_some_and(|days| days <= policy.min_inactivity_days)
    {
        return None;
    }

    Some(Candidate {
        size_mb,
        inactive_days,
    })
}

fn removal_reason(policy: &CleanupPolicy, date: &str, candidate: Candidate) -> String {
    let mut reason = format!(
        "File has been removed during folder cleaning ({}) on {date}. ",
        policy.folder.display()
    );
    if let Some(max) = policy.size_gate()
        && candidate.size_mb > 0
    {
        reason.push_str(&format!(
            "The file size was {} MB (max {max}). ",
            candidate.size_mb
        ));
    }
    if let Some(days) = candidate.inactive_days
        && days > 0
        && policy.min_inactivity_days > 0
    {
        reason.push_str(&format!(
            "The last usage was {days} days ago (max {}). ",
            policy.min_inactivity_days
        ));
    }
    reason
}
