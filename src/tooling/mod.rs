//! Tool and installer discovery for the workspace UI.

pub mod installers;
pub mod tools;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, WstError};

/// Non-hidden regular files in `dir` with the given extension, sorted by name.
///
/// A missing directory yields an empty list.
pub(crate) fn sorted_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(WstError::io(dir, error)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| WstError::io(dir, source))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
