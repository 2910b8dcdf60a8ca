//! Runtime configuration derived from the CLI.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::types::ConflictPolicy;

/// Resolved configuration for the sync daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub sync_dir: PathBuf,
    pub data_dir: PathBuf,
    pub bucket: String,
    pub reconcile_interval: Duration,
    pub workers: usize,
    pub probe_retry: RetryConfig,
    pub conflict_policy: ConflictPolicy,
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_run_args(args: &crate::cli::RunArgs) -> Self {
        Self {
            sync_dir: expand_tilde(&args.sync_dir),
            data_dir: expand_tilde(&args.data_dir),
            bucket: args.bucket.clone(),
            reconcile_interval: Duration::from_secs(args.reconcile_interval.max(1)),
            workers: args.workers.max(1),
            probe_retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: 60,
            },
            conflict_policy: args.conflict_policy,
        }
    }

    /// Path of the state database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sync.db")
    }
}

/// Resolve the database path for the status command.
pub fn db_path_in(data_dir: &str) -> PathBuf {
    expand_tilde(data_dir).join("sync.db")
}
