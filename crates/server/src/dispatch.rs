// crates/server/src/dispatch.rs
//! Executes worker and admin commands against the job store.
//!
//! One `Dispatcher` serves one invocation. Worker commands stream through the
//! caller's stdin/stdout; admin commands print to stdout.

use chrono::{SecondsFormat, Utc};
use jobfarm_core::types::is_valid_type_name;
use jobfarm_core::{
    AuditEvent, AuditLog, BundleStore, Config, JobId, JobType, Origin, PollPolicy, QueuedJob,
    ReportStore, WorkScript, WorkerCommand,
};
use jobfarm_db::{Database, DbError, LeaseManager};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    leases: LeaseManager,
    bundles: BundleStore,
    reports: ReportStore,
    audit: AuditLog,
    poll: PollPolicy,
}

impl Dispatcher {
    pub fn new(
        leases: LeaseManager,
        bundles: BundleStore,
        reports: ReportStore,
        audit: AuditLog,
        poll: PollPolicy,
    ) -> Self {
        Self {
            leases,
            bundles,
            reports,
            audit,
            poll,
        }
    }

    /// Open the store under the configured home directory.
    pub async fn open(config: &Config) -> Result<Self, DispatchError> {
        let db = Database::new(&config.db_path()).await?;
        let audit = AuditLog::new(config.audit_log_path());
        let leases = LeaseManager::new(db, config.lease, audit.clone());
        Ok(Self::new(
            leases,
            BundleStore::new(config.bundles_dir()),
            ReportStore::new(config.reports_dir()),
            audit,
            config.poll,
        ))
    }

    pub fn database(&self) -> &Database {
        self.leases.database()
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Run one parsed worker command for `origin`.
    pub async fn handle_worker<R, W>(
        &self,
        origin: &Origin,
        command: WorkerCommand,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), DispatchError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        info!(origin = %origin, command = %command, "Worker command");
        match command {
            WorkerCommand::RequestWork => self.request_work(origin, output).await.map(|_| ()),
            WorkerCommand::GiveBackWork(job_id) => self.give_back_work(origin, job_id).await,
            WorkerCommand::ReportWork(job_id) => {
                self.report_work(origin, job_id, input).await.map(|_| ())
            }
        }
    }

    /// Long-poll for a job and stream its work script to `output`.
    ///
    /// Polls every `poll.interval` until a job is leased or `poll.max_wait`
    /// has elapsed. If the job's bundle cannot be read the job stays leased
    /// and comes back once the lease runs out.
    pub async fn request_work<W>(&self, origin: &Origin, output: &mut W) -> Result<JobId, DispatchError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let started = Instant::now();
        loop {
            if let Some(job) = self.leases.dequeue(origin, Utc::now()).await? {
                let bundle = match self.bundles.load(&job.type_name).await {
                    Ok(bundle) => bundle,
                    Err(e) => {
                        error!(job_id = %job.id, job_type = %job.type_name, error = %e, "Cannot load bundle for leased job");
                        return Err(e.into());
                    }
                };
                WorkScript::new(job.id, &bundle, &job.data)
                    .write_to(output)
                    .await?;
                info!(job_id = %job.id, origin = %origin, bundle_bytes = bundle.len(), "Work script sent");
                return Ok(job.id);
            }

            let waited = started.elapsed();
            let nap = match self.poll.max_wait {
                Some(max_wait) if waited >= max_wait => return Err(DispatchError::NoWorkAvailable),
                Some(max_wait) => self.poll.interval.min(max_wait - waited),
                None => self.poll.interval,
            };
            tokio::time::sleep(nap).await;
        }
    }

    /// Release `job_id` if it is leased to `origin`.
    pub async fn give_back_work(&self, origin: &Origin, job_id: JobId) -> Result<(), DispatchError> {
        self.leases.give_back(job_id, origin).await?;
        Ok(())
    }

    /// Store everything on `input` as the report for `job_id`, then delete the
    /// job. Returns the report size.
    ///
    /// The input is staged beside the reports before the job is looked at
    /// again. If another report finished the job in the meantime this one is
    /// discarded with `JobNotFound`.
    pub async fn report_work<R>(
        &self,
        origin: &Origin,
        job_id: JobId,
        input: &mut R,
    ) -> Result<u64, DispatchError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let job = self
            .database()
            .find_job(job_id)
            .await?
            .ok_or(DbError::JobNotFound(job_id))?;
        if !job.is_leased_by(origin) {
            warn!(job_id = %job_id, origin = %origin, leased = job.is_leased(), "Report from a worker that does not hold the lease");
        }

        let staged = self.reports.stage(job_id, input).await?;
        let bytes = self.leases.finish_with_report(staged).await?;
        info!(job_id = %job_id, origin = %origin, bytes, "Report accepted");
        Ok(bytes)
    }

    pub async fn add_job_type(&self, name: &str) -> Result<JobType, DispatchError> {
        if !is_valid_type_name(name) {
            return Err(DispatchError::InvalidTypeName(name.to_string()));
        }
        let job_type = self.database().create_job_type(name).await?;

        let bundle = self.bundles.bundle_path(name)?;
        if !tokio::fs::try_exists(&bundle).await.unwrap_or(false) {
            warn!(job_type = name, path = %bundle.display(), "No bundle installed for new job type yet");
        }
        self.audit.record_or_warn(&AuditEvent::JobTypeCreated {
            name: job_type.name.clone(),
        });
        Ok(job_type)
    }

    pub async fn queue_job(&self, type_name: &str, data: &str) -> Result<QueuedJob, DispatchError> {
        let job = self
            .database()
            .create_job(type_name, data.as_bytes(), Utc::now())
            .await?;
        self.audit.record_or_warn(&AuditEvent::JobQueued {
            job_id: job.id,
            type_name: job.type_name.clone(),
        });
        Ok(job)
    }

    /// Delete a job type and every job queued under it.
    pub async fn remove_job_type(&self, name: &str) -> Result<u64, DispatchError> {
        let jobs_removed = self.database().delete_job_type(name).await?;
        self.audit.record_or_warn(&AuditEvent::JobTypeRemoved {
            name: name.to_string(),
            jobs_removed,
        });
        Ok(jobs_removed)
    }

    /// Write one tab-separated line per job: id, type, created, holder, deadline.
    pub async fn list_jobs<W>(&self, output: &mut W) -> Result<usize, DispatchError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let jobs = self.database().list_jobs().await?;
        let mut text = String::new();
        for job in &jobs {
            text.push_str(&format_job_line(job));
            text.push('\n');
        }
        output
            .write_all(text.as_bytes())
            .await
            .map_err(jobfarm_core::CodecError::Output)?;
        output.flush().await.map_err(jobfarm_core::CodecError::Output)?;
        Ok(jobs.len())
    }
}

fn format_job_line(job: &QueuedJob) -> String {
    let created = job.created_on.to_rfc3339_opts(SecondsFormat::Secs, true);
    match &job.lease {
        Some(lease) => format!(
            "{}\t{}\t{}\t{}\t{}",
            job.id,
            job.type_name,
            created,
            lease.assigned_to,
            lease.timeouts_on.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => format!("{}\t{}\t{}\t-\t-", job.id, job.type_name, created),
    }
}
