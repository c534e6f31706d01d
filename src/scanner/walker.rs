//! Depth-first folder walker for cleanup.
//!
//! Symlinks are reported neither as files nor as directories and are never
//! followed. Directories whose name is excluded are pruned before descent.
//! Each listing is read completely before its files are handed to the visitor,
//! so files the visitor creates (tombstones) are not visited in the same pass.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::{Result, WstError};

/// A regular file discovered during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Latest of modification, access and change (or creation) time.
    pub last_used: Option<SystemTime>,
}

/// Counters for one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub files: u64,
    pub pruned: u64,
    pub unreadable: u64,
}

#[derive(Debug, Clone)]
pub struct FolderWalker {
    root: PathBuf,
    excluded_names: HashSet<String>,
}

impl FolderWalker {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded_names: HashSet::new(),
        }
    }

    #[must_use]
    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_names.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and call `visit` once per regular file.
    ///
    /// Only the root is required to exist; unreadable subdirectories are
    /// skipped and counted.
    pub fn walk<F>(&self, mut visit: F) -> Result<WalkStats>
    where
        F: FnMut(&FileEntry),
    {
        // The root itself may be a symlink; nothing below it is followed.
        let root_meta =
            fs::metadata(&self.root).map_err(|source| WstError::io(&self.root, source))?;
        if !root_meta.is_dir() {
            return Err(WstError::invalid_input(format!(
                "not a directory: {}",
                self.root.display()
            )));
        }

        let mut stats = WalkStats::default();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let listing = match read_listing(&dir) {
                Ok(listing) => listing,
                Err(error) if dir == self.root => {
                    return Err(WstError::io(&dir, error));
                }
                Err(_) => {
                    stats.unreadable += 1;
                    continue;
                }
            };
            stats.directories += 1;

            let mut subdirs = Vec::new();
            for (path, kind) in listing {
                match kind {
                    Kind::Dir => {
                        if self.is_excluded(&path) {
                            stats.pruned += 1;
                        } else {
                            subdirs.push(path);
                        }
                    }
                    Kind::File => {
                        // The file may vanish between listing and stat.
                        let Ok(meta) = fs::symlink_metadata(&path) else {
                            continue;
                        };
                        stats.files += 1;
                        visit(&FileEntry {
                            size_bytes: meta.len(),
                            last_used: last_used(&meta),
                            path,
                        });
                    }
                }
            }

            // Reverse so the first listed subdirectory is walked first.
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(stats)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.excluded_names.contains(name.to_string_lossy().as_ref()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dir,
    File,
}

/// Full, name-sorted listing of one directory without symlinks or special files.
fn read_listing(dir: &Path) -> std::io::Result<Vec<(PathBuf, Kind)>> {
    let mut listing = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.kind() == ErrorKind::NotFound => continue,
            Err(error) => return Err(error),
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            listing.push((entry.path(), Kind::Dir));
        } else if file_type.is_file() {
            listing.push((entry.path(), Kind::File));
        }
    }
    listing.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(listing)
}

/// Most recent of mtime, atime and ctime (birth time off Unix).
fn last_used(meta: &fs::Metadata) -> Option<SystemTime> {
    let changed = changed_time(meta);
    [meta.modified().ok(), meta.accessed().ok(), changed]
        .into_iter()
        .flatten()
        .max()
}

#[cfg(unix)]
fn changed_time(meta: &fs::Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    use std::time::{Duration, UNIX_EPOCH};

    let secs = u64::try_from(meta.ctime()).ok()?;
    let nanos = u32::try_from(meta.ctime_nsec()).ok()?;
    UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn changed_time(meta: &fs::Metadata) -> Option<SystemTime> {
    meta.created().ok()
}
