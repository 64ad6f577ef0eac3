//! EFMS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, EfmsError>;

/// Top-level error type for the edge file management service.
#[derive(Debug, Error)]
pub enum EfmsError {
    #[error("[EFMS-1001] invalid policy configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[EFMS-1002] missing policy configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[EFMS-1003] policy configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[EFMS-2001] invalid disk capacity reading for {path}: {details}")]
    DiskInfo { path: PathBuf, details: String },

    #[error("[EFMS-2002] path not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("[EFMS-2003] archival destination unreachable: {path}")]
    DestinationUnreachable { path: PathBuf },

    #[error("[EFMS-2004] path {path} is outside the monitored mount {mount}")]
    OutsideMount { path: PathBuf, mount: PathBuf },

    #[error("[EFMS-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[EFMS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[EFMS-3101] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[EFMS-3102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[EFMS-3201] copy failed from {src} to {dst}: {details}")]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        details: String,
    },

    #[error("[EFMS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl EfmsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "EFMS-1001",
            Self::MissingConfig { .. } => "EFMS-1002",
            Self::ConfigParse { .. } => "EFMS-1003",
            Self::DiskInfo { .. } => "EFMS-2001",
            Self::PathNotFound { .. } => "EFMS-2002",
            Self::DestinationUnreachable { .. } => "EFMS-2003",
            Self::OutsideMount { .. } => "EFMS-2004",
            Self::PermissionDenied { .. } => "EFMS-3001",
            Self::Io { .. } => "EFMS-3002",
            Self::Sql { .. } => "EFMS-3101",
            Self::Serialization { .. } => "EFMS-3102",
            Self::CopyFailed { .. } => "EFMS-3201",
            Self::Runtime { .. } => "EFMS-3900",
        }
    }

    /// Whether the next scheduled run might succeed without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DiskInfo { .. }
                | Self::DestinationUnreachable { .. }
                | Self::Io { .. }
                | Self::Sql { .. }
                | Self::CopyFailed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the error aborts the whole `apply_policy` invocation, as
    /// opposed to a single file or root.
    #[must_use]
    pub const fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::DiskInfo { .. } | Self::DestinationUnreachable { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `NotFound` and `PermissionDenied` are lifted into their dedicated
    /// variants so callers can match on them without inspecting the source.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::PathNotFound {
                path: path.as_ref().to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            },
            _ => Self::Io {
                path: path.as_ref().to_path_buf(),
                source,
            },
        }
    }
}

impl From<rusqlite::Error> for EfmsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for EfmsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}
