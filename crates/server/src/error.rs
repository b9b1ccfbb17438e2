// crates/server/src/error.rs
use jobfarm_core::{CodecError, CommandError, ConfigError};
use jobfarm_db::DbError;
use thiserror::Error;

/// Message shown to the caller in place of an internal failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// How a failure is presented to whoever invoked the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Deployment problem: missing origin, missing forced-command string,
    /// unreadable configuration.
    Configuration,
    /// The caller asked for something that cannot be done.
    Validation,
    /// Storage or filesystem failure. Details stay in the log.
    Internal,
    /// A long poll ended without a job.
    NoWorkAvailable,
}

/// Every way a command invocation can fail.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Please provide a worker origin")]
    EmptyOrigin,

    #[error("SSH_ORIGINAL_COMMAND is not set; client-command must run as an SSH forced command")]
    MissingOriginalCommand,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Invalid job type name {0:?}")]
    InvalidTypeName(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("No work available")]
    NoWorkAvailable,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::EmptyOrigin | Self::MissingOriginalCommand => {
                ErrorKind::Configuration
            }
            Self::Command(_) | Self::InvalidTypeName(_) => ErrorKind::Validation,
            Self::Database(e) => match e {
                DbError::DuplicateName(_)
                | DbError::UnknownJobType(_)
                | DbError::JobNotFound(_)
                | DbError::NotLeasedBy { .. } => ErrorKind::Validation,
                DbError::Sqlx(_)
                | DbError::CreateDir(_)
                | DbError::LeaseOutOfRange { .. }
                | DbError::Report(_) => ErrorKind::Internal,
            },
            Self::Codec(_) => ErrorKind::Internal,
            Self::NoWorkAvailable => ErrorKind::NoWorkAvailable,
        }
    }

    /// The single line written to stderr for the caller.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => INTERNAL_ERROR_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}
