// crates/server/src/lib.rs
//! The `jobfarm` command: admin subcommands and the SSH forced command that
//! serves workers.

pub mod cli;
pub mod dispatch;
pub mod error;
pub mod logging;

pub use cli::{run, Cli, Command};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, ErrorKind};
