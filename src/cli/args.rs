//! CLI argument definitions using clap
//!
//! Commands:
//! - tidekv init --config <path>
//! - tidekv serve --config <path> [--port <port>]
//! - tidekv sweep --config <path>
//! - tidekv stats --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tidekv - a versioned, TTL-aware key-value database
#[derive(Parser, Debug)]
#[command(name = "tidekv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data directory and stamp the storage format
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./tidekv.json")]
        config: PathBuf,
    },

    /// Serve the HTTP API and run the expiry sweeper until Ctrl-C
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./tidekv.json")]
        config: PathBuf,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one expiry sweeper pass and print its report
    Sweep {
        /// Path to configuration file
        #[arg(long, default_value = "./tidekv.json")]
        config: PathBuf,
    },

    /// Print namespaces and record counts
    Stats {
        /// Path to configuration file
        #[arg(long, default_value = "./tidekv.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
