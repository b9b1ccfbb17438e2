// crates/server/src/main.rs
//! jobfarm binary.
//!
//! Admin subcommands run locally; `client-command <origin>` is installed as
//! the forced command of each worker's SSH key and serves exactly one request.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use jobfarm_core::command::ORIGINAL_COMMAND_ENV;
use jobfarm_core::Config;
use jobfarm_server::{logging, Cli, DispatchError, ErrorKind};

fn main() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not failures.
            let code = if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            let _ = e.print();
            return Ok(code);
        }
    };

    logging::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    Ok(runtime.block_on(serve(cli)))
}

async fn serve(cli: Cli) -> ExitCode {
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<(), DispatchError> {
    let config = Config::load()?;
    tracing::debug!(home = %config.home.display(), "Configuration loaded");

    let original_command = std::env::var(ORIGINAL_COMMAND_ENV).ok();
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    jobfarm_server::run(cli.command, &config, original_command, &mut stdin, &mut stdout).await
}

fn report(err: &DispatchError) {
    match err.kind() {
        ErrorKind::Internal => tracing::error!(error = %err, "Command failed"),
        ErrorKind::Configuration => tracing::warn!(error = %err, "Command misconfigured"),
        ErrorKind::Validation | ErrorKind::NoWorkAvailable => {
            tracing::debug!(error = %err, "Command rejected")
        }
    }
    eprintln!("{}", err.user_message());
}
