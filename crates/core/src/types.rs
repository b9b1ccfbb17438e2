// crates/core/src/types.rs
//! Plain data records returned by the job store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a job id argument is not a positive integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0:?}")]
pub struct InvalidJobId(pub String);

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(JobId(id)),
            _ => Err(InvalidJobId(s.to_string())),
        }
    }
}

/// Identity of the connecting worker, as vouched for by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    /// Returns `None` for an empty (or all-whitespace) identity.
    pub fn new(identity: impl Into<String>) -> Option<Self> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            None
        } else {
            Some(Self(identity))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered kind of work. The name doubles as the bundle file stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobType {
    pub id: i64,
    pub name: String,
}

/// Returns true if `name` is usable as a job type name.
///
/// Names end up as file names under the bundles directory, so anything that
/// could escape that directory is refused.
pub fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.chars().any(char::is_whitespace)
}

/// Assignment of a job to a worker. Present as a whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub assigned_to: Origin,
    pub assigned_on: DateTime<Utc>,
    pub timeouts_on: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeouts_on <= now
    }
}

/// A job waiting in (or leased out of) the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub type_id: i64,
    pub type_name: String,
    pub data: Vec<u8>,
    pub created_on: DateTime<Utc>,
    pub lease: Option<Lease>,
}

impl QueuedJob {
    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Returns true if the job is currently leased to `origin`.
    pub fn is_leased_by(&self, origin: &Origin) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| &lease.assigned_to == origin)
    }
}

/// Converts a stored Unix-millisecond timestamp into UTC.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
