// crates/core/src/lib.rs
//! Domain layer for the jobfarm work queue: job records, configuration,
//! the work transfer codec, report storage, the audit trail, and the worker
//! command grammar. Nothing in here touches the database.

pub mod audit;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod paths;
pub mod report;
pub mod types;

pub use audit::{AuditEvent, AuditLog};
pub use codec::{BundleStore, WorkScript};
pub use command::{CommandError, WorkerCommand};
pub use config::{Config, LeasePolicy, PollPolicy};
pub use error::{AuditError, CodecError, ConfigError};
pub use report::{ReportStore, StagedReport};
pub use types::{InvalidJobId, JobId, JobType, Lease, Origin, QueuedJob};
