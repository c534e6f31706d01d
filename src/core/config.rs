//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WstError};
use crate::core::paths::expand_home;

/// Minutes between two storage measurements. Fixed, not configurable.
pub const CHECK_INTERVAL_MINUTES: i64 = 5;

/// Route (below the base URL) of the token-authorized SSH setup endpoint.
pub const SHARED_SSH_SETUP_PATH: &str = "/shared/ssh/setup";

/// Full workspace tooling configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub cleanup: CleanupConfig,
    pub sharing: SharingConfig,
    pub paths: PathsConfig,
    pub server: ServerConfig,
}

/// Disk usage limits and measurement knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Warn when the workspace folder grows beyond this many GB.
    pub max_workspace_folder_size_gb: Option<u64>,
    /// Warn when the whole container grows beyond this many GB.
    pub max_container_size_gb: Option<u64>,
    /// Bounded wait that lets a fast background measurement land.
    pub freshness_nudge_ms: u64,
    /// Root measured for the container size.
    pub container_root: PathBuf,
    /// Paths skipped while measuring the container.
    pub container_excluded_paths: Vec<PathBuf>,
    /// `du` binary used for measurements.
    pub du_binary: PathBuf,
}

/// Defaults for folder cleanup invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    pub max_file_size_mb: Option<u64>,
    pub min_inactivity_days: u64,
    pub replace_with_tombstone: bool,
    pub excluded_folder_names: Vec<String>,
}

/// Shared links and SSH setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SharingConfig {
    pub enabled: bool,
    /// Secret the capability tokens are derived from. Defaults to
    /// `<resources>/private-key.pub`.
    pub secret_file: Option<PathBuf>,
    /// Runtime reached through a manager host when set.
    pub ssh_jumphost_target: Option<String>,
    pub workspace_port: u16,
    /// Key type grepped out of the `ssh-keyscan` output.
    pub keyscan_key_format: String,
    /// Replaces the built-in SSH client setup template.
    pub ssh_template_file: Option<PathBuf>,
}

/// Filesystem locations used by the tooling handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub home: PathBuf,
    pub resources_dir: PathBuf,
    pub workspace_home: PathBuf,
    /// Directory request paths are resolved against.
    pub server_root: PathBuf,
    /// Activity log; defaults to `<home>/.workspace/activity.jsonl`.
    pub activity_log: Option<PathBuf>,
}

/// Route mounting and standalone listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub bind: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_workspace_folder_size_gb: None,
            max_container_size_gb: None,
            freshness_nudge_ms: 50,
            container_root: PathBuf::from("/"),
            container_excluded_paths: vec![PathBuf::from("/proc")],
            du_binary: PathBuf::from("du"),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: Some(50),
            min_inactivity_days: 3,
            replace_with_tombstone: true,
            excluded_folder_names: Vec::new(),
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_file: None,
            ssh_jumphost_target: None,
            workspace_port: 8080,
            keyscan_key_format: "ecdsa".to_string(),
            ssh_template_file: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[WST-CONFIG] WARNING: HOME not set, falling back to /home/ml");
                PathBuf::from("/home/ml")
            },
            PathBuf::from,
        );
        Self {
            config_file: home.join(".workspace").join("tooling.toml"),
            server_root: home.clone(),
            home,
            resources_dir: PathBuf::from("/resources"),
            workspace_home: PathBuf::from("/workspace"),
            activity_log: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
            bind: "127.0.0.1:8090".to_string(),
        }
    }
}

impl PathsConfig {
    /// Per-user workspace state directory (`~/.workspace`).
    #[must_use]
    pub fn workspace_config_dir(&self) -> PathBuf {
        self.home.join(".workspace")
    }

    /// Location of the persisted usage snapshot.
    #[must_use]
    pub fn metadata_file(&self) -> PathBuf {
        self.workspace_config_dir().join("metadata.json")
    }

    /// Directory scanned for tool descriptions.
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.workspace_config_dir().join("tools")
    }

    /// Directory scanned for tool installer scripts.
    #[must_use]
    pub fn installers_dir(&self) -> PathBuf {
        self.resources_dir.join("tools")
    }

    #[must_use]
    pub fn activity_log_file(&self) -> PathBuf {
        self.activity_log
            .clone()
            .unwrap_or_else(|| self.workspace_config_dir().join("activity.jsonl"))
    }
}

impl SharingConfig {
    /// Effective secret file for token derivation.
    #[must_use]
    pub fn secret_file(&self, paths: &PathsConfig) -> PathBuf {
        self.secret_file
            .clone()
            .unwrap_or_else(|| paths.resources_dir.join("private-key.pub"))
    }
}

impl ServerConfig {
    /// Base URL without a trailing slash; empty when mounted at the root.
    #[must_use]
    pub fn base_prefix(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Full request path of the token-authorized SSH setup endpoint.
    #[must_use]
    pub fn shared_ssh_setup_path(&self) -> String {
        format!("{}{SHARED_SSH_SETUP_PATH}", self.base_prefix())
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| WstError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(WstError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // Size limits: anything that is not a positive integer disables the dimension.
        if let Some(raw) = lookup("MAX_WORKSPACE_FOLDER_SIZE") {
            self.storage.max_workspace_folder_size_gb =
                parse_size_limit("MAX_WORKSPACE_FOLDER_SIZE", &raw);
        }
        if let Some(raw) = lookup("MAX_CONTAINER_SIZE") {
            self.storage.max_container_size_gb = parse_size_limit("MAX_CONTAINER_SIZE", &raw);
        }

        if let Some(raw) = lookup("RESOURCES_PATH") {
            self.paths.resources_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WORKSPACE_HOME") {
            self.paths.workspace_home = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WST_SERVER_ROOT") {
            self.paths.server_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WST_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }

        // Shared links are only on when the variable says exactly "true".
        if let Some(raw) = lookup("SHARED_LINKS_ENABLED") {
            self.sharing.enabled = raw.trim().eq_ignore_ascii_case("true");
        }
        if let Some(raw) = lookup("SSH_JUMPHOST_TARGET") {
            self.sharing.ssh_jumphost_target = Some(raw);
        }
        if let Some(raw) = lookup("WORKSPACE_PORT") {
            self.sharing.workspace_port =
                raw.trim()
                    .parse::<u16>()
                    .map_err(|error| WstError::ConfigParse {
                        context: "env",
                        details: format!("WORKSPACE_PORT={raw:?}: {error}"),
                    })?;
        }

        if let Some(raw) = lookup("WST_BASE_URL") {
            self.server.base_url = raw;
        }
        if let Some(raw) = lookup("WST_BIND") {
            self.server.bind = raw;
        }
        if let Some(raw) = lookup("WST_FRESHNESS_NUDGE_MS") {
            self.storage.freshness_nudge_ms =
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| WstError::ConfigParse {
                        context: "env",
                        details: format!("WST_FRESHNESS_NUDGE_MS={raw:?}: {error}"),
                    })?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        let trimmed = self.server.base_url.trim();
        let mut base = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        if base.len() > 1 && !base.ends_with('/') {
            base.push('/');
        }
        self.server.base_url = base;

        self.cleanup
            .excluded_folder_names
            .retain(|name| !name.trim().is_empty());

        let home = self.paths.home.clone();
        for path in [
            &mut self.paths.resources_dir,
            &mut self.paths.workspace_home,
            &mut self.paths.server_root,
        ] {
            *path = expand_home(path, &home);
        }
        for path in [
            self.paths.activity_log.as_mut(),
            self.sharing.secret_file.as_mut(),
            self.sharing.ssh_template_file.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_home(path, &home);
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, limit) in [
            (
                "storage.max_workspace_folder_size_gb",
                self.storage.max_workspace_folder_size_gb,
            ),
            (
                "storage.max_container_size_gb",
                self.storage.max_container_size_gb,
            ),
        ] {
            if limit == Some(0) {
                return Err(WstError::InvalidConfig {
                    details: format!("{name} must be > 0 when set"),
                });
            }
        }

        if self.storage.freshness_nudge_ms > 1_000 {
            return Err(WstError::InvalidConfig {
                details: format!(
                    "storage.freshness_nudge_ms must be <= 1000, got {}",
                    self.storage.freshness_nudge_ms
                ),
            });
        }

        if !self.storage.container_root.is_absolute() {
            return Err(WstError::InvalidConfig {
                details: "storage.container_root must be an absolute path".to_string(),
            });
        }

        for name in &self.cleanup.excluded_folder_names {
            if name.contains('/') {
                return Err(WstError::InvalidConfig {
                    details: format!(
                        "cleanup.excluded_folder_names holds folder names, not paths: {name:?}"
                    ),
                });
            }
        }

        if self.sharing.keyscan_key_format.trim().is_empty() {
            return Err(WstError::InvalidConfig {
                details: "sharing.keyscan_key_format must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

/// Parse a GB limit from the environment; `None` disables the dimension.
fn parse_size_limit(name: &str, raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        eprintln!("[WST-CONFIG] {name}={raw:?} is not a positive integer, check disabled");
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(limit) => Some(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, WstError, parse_size_limit};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> Result<(), WstError> {
        let overrides = vars(pairs);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.storage.max_container_size_gb, None);
        assert_eq!(cfg.cleanup.max_file_size_mb, Some(50));
        assert_eq!(cfg.cleanup.min_inactivity_days, 3);
        assert!(cfg.cleanup.replace_with_tombstone);
    }

    #[test]
    fn size_limits_parse_positive_integers_only() {
        assert_eq!(parse_size_limit("X", "10"), Some(10));
        assert_eq!(parse_size_limit("X", " 7 "), Some(7));
        assert_eq!(parse_size_limit("X", "0"), None);
        assert_eq!(parse_size_limit("X", "-3"), None);
        assert_eq!(parse_size_limit("X", "2.5"), None);
        assert_eq!(parse_size_limit("X", "ten"), None);
    }

    #[test]
    fn env_limits_override_and_disable() {
        let mut cfg = Config::default();
        cfg.storage.max_workspace_folder_size_gb = Some(100);
        apply(
            &mut cfg,
            &[
                ("MAX_CONTAINER_SIZE", "10"),
                ("MAX_WORKSPACE_FOLDER_SIZE", "lots"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.storage.max_container_size_gb, Some(10));
        assert_eq!(cfg.storage.max_workspace_folder_size_gb, None);
    }

    #[test]
    fn shared_links_require_literal_true() {
        let mut cfg = Config::default();
        apply(&mut cfg, &[("SHARED_LINKS_ENABLED", "TRUE")]).unwrap();
        assert!(cfg.sharing.enabled);

        apply(&mut cfg, &[("SHARED_LINKS_ENABLED", "yes")]).unwrap();
        assert!(!cfg.sharing.enabled);
    }

    #[test]
    fn invalid_workspace_port_rejected() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &[("WORKSPACE_PORT", "http")]).unwrap_err();
        match err {
            WstError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("WORKSPACE_PORT"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn path_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("RESOURCES_PATH", "/opt/resources"),
                ("WORKSPACE_HOME", "/data/ws"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.paths.installers_dir(), PathBuf::from("/opt/resources/tools"));
        assert_eq!(
            cfg.sharing.secret_file(&cfg.paths),
            PathBuf::from("/opt/resources/private-key.pub")
        );
        assert_eq!(cfg.paths.workspace_home, PathBuf::from("/data/ws"));
    }

    #[test]
    fn derived_paths_follow_home() {
        let mut cfg = Config::default();
        cfg.paths.home = PathBuf::from("/home/ml");
        assert_eq!(
            cfg.paths.metadata_file(),
            PathBuf::from("/home/ml/.workspace/metadata.json")
        );
        assert_eq!(cfg.paths.tools_dir(), PathBuf::from("/home/ml/.workspace/tools"));
        assert_eq!(
            cfg.paths.activity_log_file(),
            PathBuf::from("/home/ml/.workspace/activity.jsonl")
        );
    }

    #[test]
    fn normalize_base_url() {
        let mut cfg = Config::default();
        cfg.server.base_url = "user/ml".to_string();
        cfg.normalize();
        assert_eq!(cfg.server.base_url, "/user/ml/");
        assert_eq!(cfg.server.base_prefix(), "/user/ml");
        assert_eq!(cfg.server.shared_ssh_setup_path(), "/user/ml/shared/ssh/setup");

        cfg.server.base_url = "/".to_string();
        cfg.normalize();
        assert_eq!(cfg.server.base_prefix(), "");
        assert_eq!(cfg.server.shared_ssh_setup_path(), "/shared/ssh/setup");
    }

    #[test]
    fn tilde_paths_expand_against_home() {
        let mut cfg: Config = toml::from_str(
            r#"
            [paths]
            home = "/home/ada"
            server_root = "~/projects"
            activity_log = "~/.workspace/log.jsonl"

            [sharing]
            secret_file = "~/.ssh/id.pub"
            "#,
        )
        .unwrap();
        cfg.normalize();
        assert_eq!(cfg.paths.server_root, Path::new("/home/ada/projects"));
        assert_eq!(
            cfg.paths.activity_log.as_deref(),
            Some(Path::new("/home/ada/.workspace/log.jsonl"))
        );
        assert_eq!(
            cfg.sharing.secret_file.as_deref(),
            Some(Path::new("/home/ada/.ssh/id.pub"))
        );
        assert_eq!(cfg.paths.resources_dir, Path::new("/resources"));
    }

    #[test]
    fn zero_limit_in_file_rejected() {
        let mut cfg = Config::default();
        cfg.storage.max_container_size_gb = Some(0);
        let err = cfg.validate().expect_err("zero limit must be rejected");
        assert!(err.to_string().contains("max_container_size_gb"));
    }

    #[test]
    fn excluded_names_must_not_be_paths() {
        let mut cfg = Config::default();
        cfg.cleanup.excluded_folder_names = vec!["a/b".to_string()];
        let err = cfg.validate().expect_err("path-like name must be rejected");
        assert!(err.to_string().contains("excluded_folder_names"));
    }

    #[test]
    fn oversized_nudge_rejected() {
        let mut cfg = Config::default();
        cfg.storage.freshness_nudge_ms = 5_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_sections_parse() {
        let raw = r#"
            [storage]
            max_container_size_gb = 20

            [cleanup]
            max_file_size_mb = 100
            excluded_folder_names = ["node_modules", ".git"]

            [sharing]
            enabled = true
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.storage.max_container_size_gb, Some(20));
        assert_eq!(cfg.storage.freshness_nudge_ms, 50);
        assert_eq!(cfg.cleanup.max_file_size_mb, Some(100));
        assert_eq!(cfg.cleanup.excluded_folder_names.len(), 2);
        assert!(cfg.sharing.enabled);
        assert_eq!(cfg.sharing.workspace_port, 8080);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/wst/tooling.toml")));
        assert!(matches!(result, Err(WstError::MissingConfig { .. })));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.cleanup.min_inactivity_days += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash"));
    }
}
