//! WST-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WstError>;

/// Top-level error type for workspace tooling.
#[derive(Debug, Error)]
pub enum WstError {
    #[error("[WST-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WST-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WST-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WST-2001] disk usage measurement failed for {path}: {details}")]
    Measurement { path: PathBuf, details: String },

    #[error("[WST-2002] cleanup already in progress for {path}")]
    CleanupInProgress { path: PathBuf },

    #[error("[WST-2003] external command `{command}` failed: {details}")]
    Command {
        command: String,
        details: String,
    },

    #[error("[WST-2004] git: {details}")]
    Git { details: String },

    #[error("[WST-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WST-2201] invalid input: {details}")]
    InvalidInput { details: String },

    #[error("[WST-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[WST-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WST-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WstError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WST-1001",
            Self::MissingConfig { .. } => "WST-1002",
            Self::ConfigParse { .. } => "WST-1003",
            Self::Measurement { .. } => "WST-2001",
            Self::CleanupInProgress { .. } => "WST-2002",
            Self::Command { .. } => "WST-2003",
            Self::Git { .. } => "WST-2004",
            Self::Serialization { .. } => "WST-2101",
            Self::InvalidInput { .. } => "WST-2201",
            Self::PermissionDenied { .. } => "WST-3001",
            Self::Io { .. } => "WST-3002",
            Self::Runtime { .. } => "WST-3900",
        }
    }

    /// Whether the failure was caused by the caller's input rather than the server.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// IO error at a known path; permission failures get their own code.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }

    /// Convenience constructor for user-input errors.
    #[must_use]
    pub fn invalid_input(details: impl Into<String>) -> Self {
        Self::InvalidInput {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for WstError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for WstError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
