//! Job type CRUD queries.

use super::row_types::JobTypeRow;
use crate::{Database, DbError, DbResult};
use jobfarm_core::JobType;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

impl Database {
    /// Register a new job type. Names are unique.
    pub async fn create_job_type(&self, name: &str) -> DbResult<JobType> {
        let mut tx = self.pool().begin().await?;
        let inserted: Result<(i64,), sqlx::Error> =
            sqlx::query_as("INSERT INTO job_types (name) VALUES (?) RETURNING id")
                .bind(name)
                .fetch_one(&mut *tx)
                .await;
        let id = match inserted {
            Ok((id,)) => id,
            Err(e) if is_unique_violation(&e) => return Err(DbError::DuplicateName(name.to_string())),
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        Ok(JobType {
            id,
            name: name.to_string(),
        })
    }

    /// Look up a job type by name.
    pub async fn find_job_type(&self, name: &str) -> DbResult<Option<JobType>> {
        let row: Option<JobTypeRow> = sqlx::query_as("SELECT id, name FROM job_types WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|JobTypeRow(t)| t))
    }

    /// All job types, oldest first.
    pub async fn list_job_types(&self) -> DbResult<Vec<JobType>> {
        let rows: Vec<JobTypeRow> = sqlx::query_as("SELECT id, name FROM job_types ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|JobTypeRow(t)| t).collect())
    }

    /// Delete a job type together with all of its queued jobs.
    ///
    /// Returns the number of jobs removed by the cascade.
    pub async fn delete_job_type(&self, name: &str) -> DbResult<u64> {
        let mut tx = self.pool().begin().await?;

        // No-op write first: takes the write lock before anything is read,
        // and tells us whether the type exists.
        let exists = sqlx::query("UPDATE job_types SET name = name WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if exists == 0 {
            return Err(DbError::UnknownJobType(name.to_string()));
        }

        let (jobs,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queued_jobs q JOIN job_types t ON t.id = q.type_id WHERE t.name = ?",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        // ON DELETE CASCADE removes the jobs.
        sqlx::query("DELETE FROM job_types WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(jobs as u64)
    }
}
