// crates/db/src/queries/row_types.rs
//! Row decoding and connection-level helpers shared by the store and the
//! lease manager.

use jobfarm_core::types::from_millis;
use jobfarm_core::{JobId, JobType, Lease, Origin, QueuedJob};
use sqlx::{Row, SqliteConnection};

/// Columns selected for every job read, in `JobRow` order.
pub(crate) const JOB_SELECT: &str = "SELECT q.id, q.type_id, t.name AS type_name, q.data, q.created_on,
        q.assigned_to, q.assigned_on, q.timeouts_on
 FROM queued_jobs q
 JOIN job_types t ON t.id = q.type_id";

/// A decoded `queued_jobs` row joined with its type name.
pub(crate) struct JobRow(pub QueuedJob);

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let assigned_to: Option<String> = row.try_get("assigned_to")?;
        let assigned_on: Option<i64> = row.try_get("assigned_on")?;
        let timeouts_on: Option<i64> = row.try_get("timeouts_on")?;

        let lease = match (assigned_to, assigned_on, timeouts_on) {
            (None, None, None) => None,
            (Some(to), Some(on), Some(until)) => {
                let assigned_to = Origin::new(to)
                    .ok_or_else(|| sqlx::Error::Decode("empty assigned_to".into()))?;
                Some(Lease {
                    assigned_to,
                    assigned_on: from_millis(on),
                    timeouts_on: from_millis(until),
                })
            }
            _ => return Err(sqlx::Error::Decode("partially assigned job row".into())),
        };

        Ok(Self(QueuedJob {
            id: JobId(row.try_get("id")?),
            type_id: row.try_get("type_id")?,
            type_name: row.try_get("type_name")?,
            data: row.try_get("data")?,
            created_on: from_millis(row.try_get("created_on")?),
            lease,
        }))
    }
}

/// A decoded `job_types` row.
pub(crate) struct JobTypeRow(pub JobType);

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobTypeRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self(JobType {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        }))
    }
}

/// Fetch one job on an open connection or transaction.
pub(crate) async fn fetch_job_tx(
    conn: &mut SqliteConnection,
    job_id: JobId,
) -> Result<Option<QueuedJob>, sqlx::Error> {
    let row: Option<JobRow> = sqlx::query_as(&format!("{JOB_SELECT} WHERE q.id = ?"))
        .bind(job_id.0)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|JobRow(job)| job))
}
