// crates/db/src/lease.rs
//! Lease state machine over the job store.
//!
//! ```text
//! UNASSIGNED --dequeue--> LEASED --timeout / give back--> UNASSIGNED
//!                           |
//!                           +--finish--> (deleted)
//! ```
//!
//! Workers talk to us through one-shot commands, so there is no connection to
//! hold a lock across. A lease is a time-bounded claim recorded on the row;
//! expired leases are reaped at the start of every dequeue, which is the only
//! recovery path for a worker that vanished mid-job.
//!
//! Every transition runs in one SQLite transaction whose first statement is a
//! write, so the transaction holds the database write lock before it reads
//! anything. That serializes concurrent dequeues without select-for-update.

use chrono::{DateTime, Utc};
use jobfarm_core::{AuditEvent, AuditLog, JobId, LeasePolicy, Origin, QueuedJob, StagedReport};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::queries::row_types::fetch_job_tx;
use crate::{Database, DbError, DbResult};

/// Assigns, reclaims, releases and finishes jobs.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    db: Database,
    policy: LeasePolicy,
    audit: AuditLog,
}

impl LeaseManager {
    pub fn new(db: Database, policy: LeasePolicy, audit: AuditLog) -> Self {
        Self { db, policy, audit }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Return every job whose lease expired at or before `now` to the
    /// unassigned pool. Returns the reclaimed ids.
    pub async fn reap_expired_leases(&self, now: DateTime<Utc>) -> DbResult<Vec<JobId>> {
        let mut tx = self.db.pool().begin().await?;
        let reaped = reap_tx(&mut tx, now).await?;
        tx.commit().await?;

        self.audit_reaped(&reaped);
        Ok(reaped)
    }

    /// Lease the oldest unassigned job to `origin`.
    ///
    /// Reaps expired leases first, in the same transaction, so a job abandoned
    /// by a dead worker is immediately eligible. Returns `None` when nothing
    /// is waiting.
    pub async fn dequeue(&self, origin: &Origin, now: DateTime<Utc>) -> DbResult<Option<QueuedJob>> {
        let timeouts_on = now
            .checked_add_signed(self.policy.lease_duration)
            .ok_or(DbError::LeaseOutOfRange {
                now,
                lease_secs: self.policy.lease_duration.num_seconds(),
            })?;

        let mut tx = self.db.pool().begin().await?;
        let reaped = reap_tx(&mut tx, now).await?;

        // Single statement: the subquery picks the FIFO head and the outer
        // guard makes the claim conditional on it still being unassigned.
        let claimed: Option<(i64,)> = sqlx::query_as(
            "UPDATE queued_jobs
             SET assigned_to = ?, assigned_on = ?, timeouts_on = ?
             WHERE id = (
                 SELECT id FROM queued_jobs
                 WHERE assigned_to IS NULL
                 ORDER BY created_on ASC, id ASC
                 LIMIT 1
             )
             AND assigned_to IS NULL
             RETURNING id",
        )
        .bind(origin.as_str())
        .bind(now.timestamp_millis())
        .bind(timeouts_on.timestamp_millis())
        .fetch_optional(&mut *tx)
        .await?;

        let job = match claimed {
            Some((id,)) => fetch_job_tx(&mut tx, JobId(id)).await?,
            None => None,
        };
        tx.commit().await?;

        self.audit_reaped(&reaped);
        match &job {
            Some(job) => {
                info!(job_id = %job.id, origin = %origin, job_type = %job.type_name, "Job leased");
                self.audit.record_or_warn(&AuditEvent::JobAssigned {
                    job_id: job.id,
                    origin: origin.clone(),
                });
            }
            None => debug!(origin = %origin, "No work available"),
        }
        Ok(job)
    }

    /// Release a job leased to `origin` back to the unassigned pool at once,
    /// regardless of how much lease time remains.
    pub async fn give_back(&self, job_id: JobId, origin: &Origin) -> DbResult<QueuedJob> {
        let mut tx = self.db.pool().begin().await?;
        let released = sqlx::query(
            "UPDATE queued_jobs
             SET assigned_to = NULL, assigned_on = NULL, timeouts_on = NULL
             WHERE id = ? AND assigned_to = ?",
        )
        .bind(job_id.0)
        .bind(origin.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let job = fetch_job_tx(&mut tx, job_id).await?;
        let job = match (released, job) {
            (_, None) => return Err(DbError::JobNotFound(job_id)),
            (0, Some(_)) => {
                return Err(DbError::NotLeasedBy {
                    job_id,
                    origin: origin.clone(),
                })
            }
            (_, Some(job)) => job,
        };
        tx.commit().await?;

        info!(job_id = %job_id, origin = %origin, "Job given back");
        self.audit.record_or_warn(&AuditEvent::JobGivenBack {
            job_id,
            origin: origin.clone(),
        });
        Ok(job)
    }

    /// Delete a job whose report has been stored. Irreversible.
    pub async fn finish(&self, job_id: JobId) -> DbResult<()> {
        self.db.delete_job(job_id).await?;

        info!(job_id = %job_id, "Job finished");
        self.audit.record_or_warn(&AuditEvent::JobFinished { job_id });
        Ok(())
    }

    /// Move `report` into place and delete its job, as one step.
    ///
    /// The job row stays write-locked from before the rename until the delete
    /// commits, so of two overlapping reports for one job exactly one is
    /// stored. The loser's staged file is dropped and the stored report is
    /// never touched. Returns the report size.
    pub async fn finish_with_report(&self, report: StagedReport) -> DbResult<u64> {
        let job_id = report.job_id();
        let mut tx = self.db.pool().begin().await?;

        let locked = sqlx::query("UPDATE queued_jobs SET id = id WHERE id = ?")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if locked == 0 {
            return Err(DbError::JobNotFound(job_id));
        }

        let bytes = report.commit().await?;
        sqlx::query("DELETE FROM queued_jobs WHERE id = ?")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(job_id = %job_id, bytes, "Job finished");
        self.audit.record_or_warn(&AuditEvent::JobFinished { job_id });
        Ok(bytes)
    }

    fn audit_reaped(&self, reaped: &[JobId]) {
        for &job_id in reaped {
            info!(job_id = %job_id, "Lease expired, job returned to queue");
            self.audit.record_or_warn(&AuditEvent::JobTimedOut { job_id });
        }
    }
}

/// Clear the lease on every job with `timeouts_on <= now`.
async fn reap_tx(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<JobId>, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "UPDATE queued_jobs
         SET assigned_to = NULL, assigned_on = NULL, timeouts_on = NULL
         WHERE timeouts_on IS NOT NULL AND timeouts_on <= ?
         RETURNING id",
    )
    .bind(now.timestamp_millis())
    .fetch_all(conn)
    .await?;

    let mut ids: Vec<JobId> = ids.into_iter().map(JobId).collect();
    ids.sort();
    Ok(ids)
}
