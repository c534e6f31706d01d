//! Path-scoped shared file links served through filebrowser.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::errors::{Result, WstError};
use crate::core::paths::resolve_under_root;
use crate::platform::command;
use crate::sharing::token::TokenService;

/// Provisions read-only access to one path for a token.
pub trait FileShareBackend: Send + Sync {
    fn provision(&self, token: &str, scope: &Path) -> Result<()>;
}

/// Adds a filebrowser user named by the token while the service is stopped.
#[derive(Debug, Clone)]
pub struct Filebrowser {
    database: PathBuf,
}

impl Filebrowser {
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            database: home.join("filebrowser.db"),
        }
    }

    fn user_add_args(&self, token: &str, scope: &Path) -> Vec<String> {
        vec![
            "users".to_string(),
            "add".to_string(),
            token.to_string(),
            token.to_string(),
            "--perm.admin=false".to_string(),
            "--perm.create=false".to_string(),
            "--perm.delete=false".to_string(),
            "--perm.download=true".to_string(),
            "--perm.execute=false".to_string(),
            "--perm.modify=false".to_string(),
            "--perm.rename=false".to_string(),
            "--perm.share=false".to_string(),
            "--lockPassword=true".to_string(),
            format!("--database={}", self.database.display()),
            format!("--scope={}", scope.display()),
        ]
    }
}

impl FileShareBackend for Filebrowser {
    fn provision(&self, token: &str, scope: &Path) -> Result<()> {
        supervisorctl("stop");
        // Re-sharing a path fails here because the user exists already; the
        // existing user keeps working.
        let added = command::run("filebrowser", self.user_add_args(token, scope), None);
        supervisorctl("start");

        let output = added?;
        if !output.success {
            eprintln!(
                "[WST-SHARE] filebrowser user not added for {}: {}",
                scope.display(),
                output.combined().trim()
            );
        }
        Ok(())
    }
}

fn supervisorctl(action: &str) {
    match command::run("supervisorctl", [action, "filebrowser"], None) {
        Ok(output) if output.success => {}
        Ok(output) => eprintln!(
            "[WST-SHARE] supervisorctl {action} filebrowser: {}",
            output.combined().trim()
        ),
        Err(error) => eprintln!("[WST-SHARE] supervisorctl {action} filebrowser: {error}"),
    }
}

/// Records provisioning calls instead of touching filebrowser.
#[derive(Debug, Default)]
pub struct RecordingShareBackend {
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingShareBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().clone()
    }
}

impl FileShareBackend for RecordingShareBackend {
    fn provision(&self, token: &str, scope: &Path) -> Result<()> {
        self.calls
            .lock()
            .push((token.to_string(), scope.to_path_buf()));
        Ok(())
    }
}

/// Where a shared link points.
#[derive(Debug, Clone, Copy)]
pub struct LinkTarget<'a> {
    pub origin: &'a str,
    /// Base URL without trailing slash.
    pub base_prefix: &'a str,
}

/// Create the share for `request_path` and return its link.
pub fn share_link(
    tokens: &TokenService,
    backend: &dyn FileShareBackend,
    server_root: &Path,
    request_path: &str,
    target: LinkTarget<'_>,
) -> Result<String> {
    let resolved = resolve_under_root(server_root, request_path)?;
    if !resolved.exists() {
        return Err(WstError::invalid_input(format!(
            "The selected file or folder does not exist: {}",
            resolved.display()
        )));
    }

    let token = tokens.derive(&resolved.to_string_lossy());
    backend.provision(&token, &resolved)?;

    Ok(format!(
        "{}{}/shared/filebrowser/?token={token}",
        target.origin.trim_end_matches('/'),
        target.base_prefix
    ))
}
