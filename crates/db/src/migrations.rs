/// Inline SQL migrations for the jobfarm database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained. Timestamps are Unix
/// milliseconds (UTC).

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: job types
    r#"
CREATE TABLE IF NOT EXISTS job_types (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
"#,
    // Migration 2: queued jobs. AUTOINCREMENT so a finished job's id is never
    // handed to a new job; a late report for it must not hit someone else's work.
    r#"
CREATE TABLE IF NOT EXISTS queued_jobs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    type_id     INTEGER NOT NULL REFERENCES job_types(id) ON UPDATE CASCADE ON DELETE CASCADE,
    data        BLOB NOT NULL,
    created_on  INTEGER NOT NULL,
    assigned_to TEXT,
    assigned_on INTEGER,
    timeouts_on INTEGER,
    CHECK (
        (assigned_to IS NULL AND assigned_on IS NULL AND timeouts_on IS NULL)
        OR (assigned_to IS NOT NULL AND assigned_on IS NOT NULL AND timeouts_on IS NOT NULL
            AND timeouts_on > assigned_on)
    )
);
"#,
    // Migration 3: FIFO head of the unassigned pool
    r#"
CREATE INDEX IF NOT EXISTS idx_queued_jobs_unassigned
    ON queued_jobs(created_on, id) WHERE assigned_to IS NULL;
"#,
    // Migration 4: lease expiry scan
    r#"
CREATE INDEX IF NOT EXISTS idx_queued_jobs_timeouts
    ON queued_jobs(timeouts_on) WHERE timeouts_on IS NOT NULL;
"#,
    // Migration 5: cascade lookups
    r#"
CREATE INDEX IF NOT EXISTS idx_queued_jobs_type ON queued_jobs(type_id);
"#,
];
