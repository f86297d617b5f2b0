use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Optional path to config file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new batch under the configured root directory
    New,

    /// Interactive imaging session
    Session {
        /// Continue an existing batch instead of creating one
        #[arg(long)]
        batch: Option<PathBuf>,
    },

    /// Image a single carrier into an existing batch
    Image {
        #[arg(long)]
        batch: PathBuf,

        /// Catalog identifier (title is looked up when catalog lookup is enabled)
        #[arg(long)]
        catalog_id: Option<String>,

        /// Carrier title
        #[arg(long)]
        title: Option<String>,

        /// Volume number within a multi-carrier item, starting at 1
        #[arg(long, default_value_t = 1)]
        volume: u32,
    },

    /// Wait for any running carrier, then close the batch for good
    Finalize {
        #[arg(long)]
        batch: PathBuf,
    },

    /// Show manifest rows and a success tally
    Status {
        #[arg(long)]
        batch: PathBuf,

        /// Also re-hash every carrier directory against its checksum file
        #[arg(long)]
        verify: bool,
    },
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
