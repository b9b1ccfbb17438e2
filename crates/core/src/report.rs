// crates/core/src/report.rs
//! Durable storage for worker-submitted reports.
//!
//! A report must be on disk before its job row is deleted: a stored report
//! with a surviving job can simply be finished again, while a deleted job
//! with no report is lost work.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::CodecError;
use crate::types::JobId;

/// Writes reports to `<dir>/<job id>`.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(job_id.to_string())
    }

    /// Copy `reader` to end-of-stream into the report file for `job_id`,
    /// replacing any previous report. Returns the number of bytes stored.
    pub async fn persist<R>(&self, job_id: JobId, reader: &mut R) -> Result<u64, CodecError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.stage(job_id, reader).await?.commit().await
    }

    /// Copy `reader` into a synced temporary file next to the final report.
    ///
    /// Nothing is visible under the report name until [`StagedReport::commit`];
    /// dropping the staged report removes the temporary file.
    pub async fn stage<R>(&self, job_id: JobId, reader: &mut R) -> Result<StagedReport, CodecError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CodecError::io(&self.dir, e))?;

        let tmp = tempfile::Builder::new()
            .prefix(".report-")
            .tempfile_in(&self.dir)
            .map_err(|e| CodecError::io(&self.dir, e))?;
        let std_file = tmp.reopen().map_err(|e| CodecError::io(tmp.path(), e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let bytes = tokio::io::copy(reader, &mut file)
            .await
            .map_err(|e| CodecError::io(tmp.path(), e))?;
        file.flush().await.map_err(|e| CodecError::io(tmp.path(), e))?;
        file.sync_all()
            .await
            .map_err(|e| CodecError::io(tmp.path(), e))?;
        drop(file);

        Ok(StagedReport {
            job_id,
            bytes,
            tmp,
            dir: self.dir.clone(),
            dest: self.report_path(job_id),
        })
    }
}

/// A fully written report that has not been moved into place yet.
#[derive(Debug)]
pub struct StagedReport {
    job_id: JobId,
    bytes: u64,
    tmp: NamedTempFile,
    dir: PathBuf,
    dest: PathBuf,
}

impl StagedReport {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Rename the report over `<dir>/<job id>` and sync the directory.
    pub async fn commit(self) -> Result<u64, CodecError> {
        let Self {
            job_id,
            bytes,
            tmp,
            dir,
            dest,
        } = self;
        tmp.persist(&dest)
            .map_err(|e| CodecError::io(&dest, e.error))?;
        sync_dir(&dir).await?;

        tracing::debug!(job_id = %job_id, bytes, path = %dest.display(), "Report stored");
        Ok(bytes)
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), CodecError> {
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|e| CodecError::io(dir, e))?;
    handle.sync_all().await.map_err(|e| CodecError::io(dir, e))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), CodecError> {
    Ok(())
}
