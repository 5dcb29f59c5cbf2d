//! YKM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, YkmError>;

/// Top-level error type for ykmon.
#[derive(Debug, Error)]
pub enum YkmError {
    #[error("[YKM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[YKM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[YKM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[YKM-2001] failed to spawn probe command {command}: {source}")]
    ProbeSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[YKM-2002] probe command {command} exited with status {status}: {stderr}")]
    ProbeFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("[YKM-2003] probe command {command} timed out after {timeout_ms}ms")]
    ProbeTimeout { command: String, timeout_ms: u64 },

    #[error("[YKM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[YKM-3001] another instance is already running (pid {pid:?}, lock {path})")]
    AlreadyRunning { pid: Option<i32>, path: PathBuf },

    #[error("[YKM-3002] pid file failure at {path}: {details}")]
    PidFile { path: PathBuf, details: String },

    #[error("[YKM-3003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[YKM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl YkmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "YKM-1001",
            Self::MissingConfig { .. } => "YKM-1002",
            Self::ConfigParse { .. } => "YKM-1003",
            Self::ProbeSpawn { .. } => "YKM-2001",
            Self::ProbeFailed { .. } => "YKM-2002",
            Self::ProbeTimeout { .. } => "YKM-2003",
            Self::Serialization { .. } => "YKM-2101",
            Self::AlreadyRunning { .. } => "YKM-3001",
            Self::PidFile { .. } => "YKM-3002",
            Self::Io { .. } => "YKM-3003",
            Self::Runtime { .. } => "YKM-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// The next poll cycle is the only retry mechanism: probe failures and
    /// transient IO are retryable, configuration and lock conflicts are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProbeSpawn { .. }
                | Self::ProbeFailed { .. }
                | Self::ProbeTimeout { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for YkmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for YkmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
