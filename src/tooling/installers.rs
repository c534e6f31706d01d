//! Installer scripts from `$RESOURCES_PATH/tools/*.sh`.

#![allow(missing_docs)]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::tooling::sorted_files_with_extension;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerRecord {
    pub name: String,
    pub command: String,
}

/// One record per script, sorted by file name. An empty directory yields a
/// single `none` record whose command names the directory searched.
pub fn list_installers(dir: &Path) -> Result<Vec<InstallerRecord>> {
    let mut installers: Vec<InstallerRecord> = sorted_files_with_extension(dir, "sh")?
        .into_iter()
        .filter_map(|script| {
            let name = script.file_stem()?.to_string_lossy().trim().to_string();
            Some(InstallerRecord {
                command: format!("/bin/bash {}", script.display()),
                name,
            })
        })
        .collect();

    if installers.is_empty() {
        let message = format!(
            "No workspace tool installers found at path: {}",
            dir.display()
        );
        eprintln!("[WST-TOOLS] {message}");
        installers.push(InstallerRecord {
            name: "none".to_string(),
            command: message,
        });
    }
    Ok(installers)
}
