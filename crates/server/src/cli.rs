// crates/server/src/cli.rs
//! Command line surface of the `jobfarm` binary.

use clap::{Parser, Subcommand};
use jobfarm_core::{Config, Origin, WorkerCommand};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;

#[derive(Parser, Debug)]
#[command(name = "jobfarm")]
#[command(version)]
#[command(about = "Lease-based job queue served to workers over SSH")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register a job type. Its bundle is read from <home>/bundles/<name>.tar.gz
    AddJobType { name: String },

    /// Queue a job of an existing type with the given data
    QueueJob { type_name: String, data: String },

    /// Remove a job type together with all of its queued jobs
    RemoveJobType { name: String },

    /// List every queued job, oldest first
    ListJobs,

    /// Serve one worker request; install as the SSH forced command.
    ///
    /// The request itself is read from SSH_ORIGINAL_COMMAND.
    ClientCommand { origin: String },
}

/// Execute `command`.
///
/// `original_command` is the worker's request string, consulted only by
/// `client-command`. Origin and request are checked before the store is
/// opened, so a misconfigured forced command changes nothing on disk.
pub async fn run<R, W>(
    command: Command,
    config: &Config,
    original_command: Option<String>,
    input: &mut R,
    output: &mut W,
) -> Result<(), DispatchError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let worker = match &command {
        Command::ClientCommand { origin } => {
            let origin = Origin::new(origin.as_str()).ok_or(DispatchError::EmptyOrigin)?;
            let line = original_command.ok_or(DispatchError::MissingOriginalCommand)?;
            Some((origin, WorkerCommand::parse(&line)?))
        }
        _ => None,
    };

    let dispatcher = Dispatcher::open(config).await?;
    let result = match (command, worker) {
        (_, Some((origin, request))) => {
            dispatcher
                .handle_worker(&origin, request, input, output)
                .await
        }
        (command, None) => execute_admin(&dispatcher, command, output).await,
    };
    dispatcher.database().close().await;
    result
}

async fn execute_admin<W>(
    dispatcher: &Dispatcher,
    command: Command,
    output: &mut W,
) -> Result<(), DispatchError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match command {
        Command::AddJobType { name } => {
            let job_type = dispatcher.add_job_type(&name).await?;
            print_line(output, &format!("Created job type {}", job_type.name)).await
        }
        Command::QueueJob { type_name, data } => {
            let job = dispatcher.queue_job(&type_name, &data).await?;
            print_line(output, &format!("Queued job {}", job.id)).await
        }
        Command::RemoveJobType { name } => {
            let removed = dispatcher.remove_job_type(&name).await?;
            print_line(
                output,
                &format!("Removed job type {name} and {removed} queued job(s)"),
            )
            .await
        }
        Command::ListJobs => dispatcher.list_jobs(output).await.map(|_| ()),
        Command::ClientCommand { .. } => Err(DispatchError::MissingOriginalCommand),
    }
}

async fn print_line<W>(output: &mut W, line: &str) -> Result<(), DispatchError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let to_err = jobfarm_core::CodecError::Output;
    output
        .write_all(format!("{line}\n").as_bytes())
        .await
        .map_err(to_err)?;
    output.flush().await.map_err(to_err)?;
    Ok(())
}
