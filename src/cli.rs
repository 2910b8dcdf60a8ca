use clap::{Args, Parser, Subcommand};

use crate::types::{ConflictPolicy, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "bucketsync",
    about = "Keep a local directory in sync with a cloud storage bucket"
)]
pub struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sync daemon
    Run(RunArgs),
    /// Show sync state counts
    Status(StatusArgs),
    /// Execute one JSON account command and print the JSON result
    Ipc(IpcArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory to keep in sync (created if missing)
    #[arg(short = 'd', long, default_value = "~/Bucketsync")]
    pub sync_dir: String,

    /// Directory for the state database
    #[arg(long, env = "BUCKETSYNC_DATA_DIR", default_value = "~/.bucketsync")]
    pub data_dir: String,

    /// Bucket name in the remote store (created on first run)
    #[arg(short = 'b', long, default_value = "bucketsync")]
    pub bucket: String,

    /// Number of concurrent sync workers
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Seconds between reconciliation passes
    #[arg(long, default_value_t = 60)]
    pub reconcile_interval: u64,

    /// Conflict resolution policy when both copies changed
    #[arg(long, value_enum, default_value = "prefer-newer")]
    pub conflict_policy: ConflictPolicy,

    /// Retries for remote probe steps inside a sync task
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay in seconds for retry backoff
    #[arg(long, default_value_t = 3)]
    pub retry_delay: u64,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Directory holding the state database
    #[arg(long, env = "BUCKETSYNC_DATA_DIR", default_value = "~/.bucketsync")]
    pub data_dir: String,
}

#[derive(Args, Debug)]
pub struct IpcArgs {
    /// JSON request; read from stdin when omitted
    pub request: Option<String>,
}
