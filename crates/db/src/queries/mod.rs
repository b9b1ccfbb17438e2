// crates/db/src/queries/mod.rs
// Job store operations for the jobfarm SQLite database.

mod job_types;
mod jobs;
pub(crate) mod row_types;

pub use jobs::QueueDepth;
