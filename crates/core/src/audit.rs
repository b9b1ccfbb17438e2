// crates/core/src/audit.rs
//! Append-only audit trail of queue state transitions.
//!
//! One line per transition: `<RFC 3339 timestamp>: <event>`. Operational
//! diagnostics go through `tracing`; this file only ever records what
//! happened to job types and jobs.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::AuditError;
use crate::types::{JobId, Origin};

/// A recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    JobTypeCreated { name: String },
    JobTypeRemoved { name: String, jobs_removed: u64 },
    JobQueued { job_id: JobId, type_name: String },
    JobAssigned { job_id: JobId, origin: Origin },
    JobTimedOut { job_id: JobId },
    JobGivenBack { job_id: JobId, origin: Origin },
    JobFinished { job_id: JobId },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JobTypeCreated { name } => write!(f, "create job type \"{name}\""),
            Self::JobTypeRemoved { name, jobs_removed } => {
                write!(f, "remove job type \"{name}\" and {jobs_removed} queued job(s)")
            }
            Self::JobQueued { job_id, type_name } => {
                write!(f, "queue job {job_id} of type \"{type_name}\"")
            }
            Self::JobAssigned { job_id, origin } => {
                write!(f, "job {job_id} is assigned to {origin}")
            }
            Self::JobTimedOut { job_id } => write!(f, "job {job_id} timed out and is deassigned"),
            Self::JobGivenBack { job_id, origin } => {
                write!(f, "job {job_id} is given back by {origin} and deassigned")
            }
            Self::JobFinished { job_id } => {
                write!(f, "job {job_id} has finished successfully and is deleted")
            }
        }
    }
}

/// Handle to the audit log file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// An audit log that only emits tracing events.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `event` stamped with the current time.
    pub fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.record_at(event, Utc::now())
    }

    pub fn record_at(&self, event: &AuditEvent, at: DateTime<Utc>) -> Result<(), AuditError> {
        tracing::info!(target: "jobfarm::audit", event = %event, "audit");

        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = format!("{}: {}\n", at.to_rfc3339_opts(SecondsFormat::Millis, true), event);
        let to_err = |source: std::io::Error| AuditError {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(to_err)?;
        }
        // O_APPEND keeps single-write lines intact across concurrent invocations.
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(to_err)?;
        file.write_all(line.as_bytes()).map_err(to_err)
    }

    /// Record `event`, logging instead of failing. Used after a transition has
    /// already been committed, where an audit failure must not undo it.
    pub fn record_or_warn(&self, event: &AuditEvent) {
        if let Err(e) = self.record(event) {
            tracing::warn!(error = %e, event = %event, "Failed to write audit log entry");
        }
    }
}
