// crates/core/src/command.rs
//! Grammar of the worker-facing command line.
//!
//! The transport hands us the worker's command verbatim (for SSH, the
//! contents of `SSH_ORIGINAL_COMMAND`). Only three commands exist.

use std::fmt;

use thiserror::Error;

use crate::types::{InvalidJobId, JobId};

/// Environment variable carrying the worker's command line.
pub const ORIGINAL_COMMAND_ENV: &str = "SSH_ORIGINAL_COMMAND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    RequestWork,
    GiveBackWork(JobId),
    ReportWork(JobId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Please provide a client command")]
    Empty,

    #[error("Command unknown: {0}")]
    Unknown(String),

    #[error("{command} requires a job id")]
    MissingJobId { command: &'static str },

    #[error(transparent)]
    InvalidJobId(#[from] InvalidJobId),

    #[error("Unexpected argument to {command}: {argument}")]
    UnexpectedArgument {
        command: &'static str,
        argument: String,
    },
}

impl WorkerCommand {
    pub const REQUEST_WORK: &'static str = "request-work";
    pub const GIVE_BACK_WORK: &'static str = "give-back-work";
    pub const REPORT_WORK: &'static str = "report-work";

    /// Parse a whitespace-separated worker command line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;

        let (command, name) = match name {
            Self::REQUEST_WORK => (Self::RequestWork, Self::REQUEST_WORK),
            Self::GIVE_BACK_WORK => {
                let id = job_id_arg(words.next(), Self::GIVE_BACK_WORK)?;
                (Self::GiveBackWork(id), Self::GIVE_BACK_WORK)
            }
            Self::REPORT_WORK => {
                let id = job_id_arg(words.next(), Self::REPORT_WORK)?;
                (Self::ReportWork(id), Self::REPORT_WORK)
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        if let Some(extra) = words.next() {
            return Err(CommandError::UnexpectedArgument {
                command: name,
                argument: extra.to_string(),
            });
        }
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestWork => Self::REQUEST_WORK,
            Self::GiveBackWork(_) => Self::GIVE_BACK_WORK,
            Self::ReportWork(_) => Self::REPORT_WORK,
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestWork => f.write_str(Self::REQUEST_WORK),
            Self::GiveBackWork(id) | Self::ReportWork(id) => write!(f, "{} {id}", self.name()),
        }
    }
}

fn job_id_arg(arg: Option<&str>, command: &'static str) -> Result<JobId, CommandError> {
    let arg = arg.ok_or(CommandError::MissingJobId { command })?;
    Ok(arg.parse::<JobId>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_work() {
        assert_eq!(WorkerCommand::parse("request-work"), Ok(WorkerCommand::RequestWork));
        assert_eq!(WorkerCommand::parse("  request-work \n"), Ok(WorkerCommand::RequestWork));
    }

    #[test]
    fn test_parse_report_and_give_back() {
        assert_eq!(
            WorkerCommand::parse("report-work 17"),
            Ok(WorkerCommand::ReportWork(JobId(17)))
        );
        assert_eq!(
            WorkerCommand::parse("give-back-work 3"),
            Ok(WorkerCommand::GiveBackWork(JobId(3)))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(WorkerCommand::parse(""), Err(CommandError::Empty));
        assert_eq!(
            WorkerCommand::parse("rm -rf /"),
            Err(CommandError::Unknown("rm".into()))
        );
        assert_eq!(
            WorkerCommand::parse("report-work"),
            Err(CommandError::MissingJobId { command: "report-work" })
        );
        assert!(matches!(
            WorkerCommand::parse("report-work abc"),
            Err(CommandError::InvalidJobId(_))
        ));
        assert!(matches!(
            WorkerCommand::parse("report-work 0"),
            Err(CommandError::InvalidJobId(_))
        ));
        assert!(matches!(
            WorkerCommand::parse("request-work now"),
            Err(CommandError::UnexpectedArgument { .. })
        ));
    }

    #[test]
    fn test_display_roundtrips() {
        for cmd in [
            WorkerCommand::RequestWork,
            WorkerCommand::GiveBackWork(JobId(4)),
            WorkerCommand::ReportWork(JobId(5)),
        ] {
            assert_eq!(WorkerCommand::parse(&cmd.to_string()), Ok(cmd));
        }
    }
}
