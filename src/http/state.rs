use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::git::repo::GitCli;
use crate::logger::activity::ActivityLoggerHandle;
use crate::monitor::storage_check::StorageCheck;
use crate::platform::disk_usage::{DiskUsage, DuCommand};
use crate::sharing::links::{FileShareBackend, Filebrowser};
use crate::sharing::ssh::{HostKeyScanner, SetupScriptBuilder, SshKeyscan};
use crate::sharing::token::TokenService;

/// Everything the handlers need, built once at startup.
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub storage: Arc<StorageCheck>,
    pub git: GitCli,
    pub share_backend: Arc<dyn FileShareBackend>,
    pub key_scanner: Arc<dyn HostKeyScanner>,
}

impl HttpState {
    /// Production wiring: `du`, `git`, `ssh-keyscan` and filebrowser.
    pub fn from_config(config: Config, logger: Option<ActivityLoggerHandle>) -> Self {
        let disk_usage: Arc<dyn DiskUsage> = Arc::new(DuCommand::new(config.storage.du_binary.clone()));
        let storage = StorageCheck::from_config(&config, disk_usage, logger);
        Self {
            share_backend: Arc::new(Filebrowser::new(&config.paths.home)),
            key_scanner: Arc::new(SshKeyscan),
            git: GitCli::default(),
            storage: Arc::new(storage),
            config: Arc::new(config),
        }
    }

    /// Token service over the current secret file.
    ///
    /// Read per call so a rotated secret takes effect without a restart.
    pub fn tokens(&self) -> Result<TokenService> {
        TokenService::from_secret_file(&self.config.sharing.secret_file(&self.config.paths))
    }

    pub fn setup_script_builder(&self) -> Result<SetupScriptBuilder> {
        SetupScriptBuilder::from_config(&self.config, Arc::clone(&self.key_scanner))
    }
}
