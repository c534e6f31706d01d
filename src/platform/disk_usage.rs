//! Disk usage measurement: the `du` primitive and a deterministic mock.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::errors::{Result, WstError};
use crate::platform::command;

/// What to measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureRequest {
    pub path: PathBuf,
    /// Stay on the filesystem of `path` (`du -x`).
    pub one_file_system: bool,
    pub excluded_paths: Vec<PathBuf>,
}

impl MeasureRequest {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            one_file_system: false,
            excluded_paths: Vec::new(),
        }
    }

    #[must_use]
    pub const fn one_file_system(mut self, enabled: bool) -> Self {
        self.one_file_system = enabled;
        self
    }

    #[must_use]
    pub fn excluding(mut self, excluded: &[PathBuf]) -> Self {
        self.excluded_paths.extend_from_slice(excluded);
        self
    }
}

/// Recursive on-disk size of a directory tree, in kilobytes.
pub trait DiskUsage: Send + Sync {
    fn measure_kb(&self, request: &MeasureRequest) -> Result<u64>;
}

/// Production measurer shelling out to `du -s`.
#[derive(Debug, Clone)]
pub struct DuCommand {
    binary: PathBuf,
}

impl Default for DuCommand {
    fn default() -> Self {
        Self::new("du")
    }
}

impl DuCommand {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(request: &MeasureRequest) -> Vec<String> {
        let mut args = vec!["-s".to_string(), "-k".to_string()];
        if request.one_file_system {
            args.push("-x".to_string());
        }
        for excluded in &request.excluded_paths {
            args.push(format!("--exclude={}", excluded.display()));
        }
        args.push(request.path.display().to_string());
        args
    }
}

impl DiskUsage for DuCommand {
    fn measure_kb(&self, request: &MeasureRequest) -> Result<u64> {
        let output = command::run(&self.binary, Self::args(request), None).map_err(|err| {
            WstError::Measurement {
                path: request.path.clone(),
                details: err.to_string(),
            }
        })?;
        // A partial total from an unreadable subtree understates usage.
        if !output.success {
            return Err(WstError::Measurement {
                path: request.path.clone(),
                details: format!(
                    "du exited with {}: {}",
                    output.code.unwrap_or(-1),
                    output.stderr.trim()
                ),
            });
        }
        parse_du_output(&output.stdout).ok_or_else(|| WstError::Measurement {
            path: request.path.clone(),
            details: format!("unparsable du output: {:?}", output.stdout.trim()),
        })
    }
}

/// First whitespace-delimited token of the first line, as KB.
fn parse_du_output(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
}

/// In-memory measurer for deterministic tests.
#[derive(Debug, Default)]
pub struct MockDiskUsage {
    sizes: Mutex<HashMap<PathBuf, u64>>,
    failing: Mutex<Vec<PathBuf>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockDiskUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every measurement sleeps this long before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_size(self, path: impl AsRef<Path>, kb: u64) -> Self {
        self.set_size(path, kb);
        self
    }

    pub fn set_size(&self, path: impl AsRef<Path>, kb: u64) {
        self.sizes.lock().insert(path.as_ref().to_path_buf(), kb);
    }

    /// Make measurements of `path` fail.
    pub fn fail(&self, path: impl AsRef<Path>) {
        self.failing.lock().push(path.as_ref().to_path_buf());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DiskUsage for MockDiskUsage {
    fn measure_kb(&self, request: &MeasureRequest) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing.lock().contains(&request.path) {
            return Err(WstError::Measurement {
                path: request.path.clone(),
                details: "mock failure".to_string(),
            });
        }
        self.sizes
            .lock()
            .get(&request.path)
            .copied()
            .ok_or_else(|| WstError::Measurement {
                path: request.path.clone(),
                details: "mock size not set".to_string(),
            })
    }
}
