// crates/db/src/queries/jobs.rs
//! Queued job queries.
//!
//! These are plain store operations. Assignment and release go through
//! [`crate::LeaseManager`], which owns the lease state machine.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use futures_util::{Stream, TryStreamExt};
use jobfarm_core::{JobId, QueuedJob};

use super::row_types::{fetch_job_tx, JobRow, JOB_SELECT};
use crate::{Database, DbError, DbResult};

/// FIFO order of the queue: creation time, then insertion order.
const FIFO_ORDER: &str = "ORDER BY q.created_on ASC, q.id ASC";

static UNASSIGNED_FIFO: LazyLock<String> =
    LazyLock::new(|| format!("{JOB_SELECT} WHERE q.assigned_to IS NULL {FIFO_ORDER}"));

/// Number of jobs waiting and out on lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub unassigned: u64,
    pub leased: u64,
}

impl Database {
    /// Queue a job of type `type_name` carrying `payload`, created at `now`.
    pub async fn create_job(
        &self,
        type_name: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> DbResult<QueuedJob> {
        let mut tx = self.pool().begin().await?;
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO queued_jobs (type_id, data, created_on)
             SELECT id, ?, ? FROM job_types WHERE name = ?
             RETURNING id",
        )
        .bind(payload)
        .bind(now.timestamp_millis())
        .bind(type_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = inserted else {
            return Err(DbError::UnknownJobType(type_name.to_string()));
        };
        let job = fetch_job_tx(&mut tx, JobId(id))
            .await?
            .ok_or(DbError::JobNotFound(JobId(id)))?;
        tx.commit().await?;
        Ok(job)
    }

    /// Look up a job by id.
    pub async fn find_job(&self, job_id: JobId) -> DbResult<Option<QueuedJob>> {
        let mut conn = self.pool().acquire().await?;
        Ok(fetch_job_tx(&mut conn, job_id).await?)
    }

    /// Unassigned jobs in FIFO order, fetched lazily.
    pub fn list_unassigned_ordered_by_creation(
        &self,
    ) -> impl Stream<Item = DbResult<QueuedJob>> + Send + '_ {
        sqlx::query_as::<_, JobRow>(UNASSIGNED_FIFO.as_str())
            .fetch(self.pool())
            .map_ok(|JobRow(job)| job)
            .map_err(DbError::from)
    }

    /// Every job, FIFO order, leased or not.
    pub async fn list_jobs(&self) -> DbResult<Vec<QueuedJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!("{JOB_SELECT} {FIFO_ORDER}"))
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|JobRow(job)| job).collect())
    }

    /// Permanently remove a job.
    pub async fn delete_job(&self, job_id: JobId) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        let deleted = sqlx::query("DELETE FROM queued_jobs WHERE id = ?")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(DbError::JobNotFound(job_id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Count unassigned and leased jobs.
    pub async fn queue_depth(&self) -> DbResult<QueueDepth> {
        let (unassigned, leased): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(assigned_to IS NULL), 0), COALESCE(SUM(assigned_to IS NOT NULL), 0)
             FROM queued_jobs",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(QueueDepth {
            unassigned: unassigned as u64,
            leased: leased as u64,
        })
    }
}
