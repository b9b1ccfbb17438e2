// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine data directory; set JOBFARM_HOME")]
    NoHomeDir,

    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors that can occur while encoding work or persisting reports
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Bundle for job type {type_name:?} not found at {path}")]
    MissingBundle { type_name: String, path: PathBuf },

    #[error("Invalid job type name: {0:?}")]
    InvalidTypeName(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to output stream: {0}")]
    Output(#[source] std::io::Error),
}

impl CodecError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur while appending to the audit log
#[derive(Debug, Error)]
#[error("Failed to append to audit log {path}: {source}")]
pub struct AuditError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
