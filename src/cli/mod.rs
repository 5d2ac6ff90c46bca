//! CLI module for tidekv
//!
//! Provides command-line interface for:
//! - init: Create the data directory and stamp the storage format
//! - serve: Serve HTTP and run the sweeper until Ctrl-C
//! - sweep: One sweeper pass
//! - stats: Namespace counts

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, run, run_command, serve, stats, sweep};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
