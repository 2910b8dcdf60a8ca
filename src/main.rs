//! bucketsync — keep a local directory in sync with a cloud storage bucket.
//!
//! A reconciliation loop compares the sync directory, the remote bucket
//! listing, and a durable SQLite state record per file, then drives
//! uploads, downloads, and deletes through a deduplicating task queue.
//! A filesystem watcher accelerates local changes between passes.

#![warn(clippy::all)]

mod cli;
mod config;
mod engine;
mod ipc;
mod remote;
pub mod retry;
mod shutdown;
mod store;
mod types;
mod watcher;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use remote::memory::MemoryRemote;
use remote::RemoteStore;
use store::{SqliteSyncStore, SyncStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Run(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Ipc(args) => run_ipc(args).await,
    }
}

async fn run_sync(args: cli::RunArgs) -> anyhow::Result<()> {
    let config = config::Config::from_run_args(&args);

    std::fs::create_dir_all(&config.sync_dir).with_context(|| {
        format!("cannot create sync directory {}", config.sync_dir.display())
    })?;
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("cannot create data directory {}", config.data_dir.display())
    })?;

    let db_path = config.db_path();
    let store = Arc::new(SqliteSyncStore::open(&db_path)?);
    tracing::debug!(path = %db_path.display(), "State database opened");

    let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());

    let token = shutdown::install_signal_handler();

    let bucket = engine::ensure_bucket(remote.as_ref(), &config.bucket, &config.probe_retry)
        .await
        .context("cannot find or create the sync bucket")?;

    let ctx = Arc::new(engine::SyncContext {
        store,
        remote,
        queue: Arc::new(engine::TaskQueue::new()),
        bucket,
        sync_dir: config.sync_dir.clone(),
        conflict_policy: config.conflict_policy,
        probe_retry: config.probe_retry,
    });

    engine::run(ctx, config.workers, config.reconcile_interval, token).await
}

async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::db_path_in(&args.data_dir);

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run the daemon first to create it.");
        return Ok(());
    }

    let store = SqliteSyncStore::open(&db_path)?;
    let summary = store.summary().await?;

    println!("State database: {}", db_path.display());
    println!();
    println!("Files:");
    println!("  Total:     {}", summary.total);
    println!("  Synced:    {}", summary.synced);
    println!("  Pending:   {}", summary.pending);
    println!("  Failed:    {}", summary.failed);
    println!("  Deleting:  {}", summary.deleting);
    println!("  Conflicts: {}", summary.conflicts);

    Ok(())
}

async fn run_ipc(args: cli::IpcArgs) -> anyhow::Result<()> {
    let request = match args.request {
        Some(request) => request,
        None => {
            use tokio::io::AsyncReadExt as _;
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("cannot read request from stdin")?;
            input
        }
    };

    let remote = MemoryRemote::new();
    let response = ipc::execute_json(&remote, request.trim()).await;
    println!("{response}");
    Ok(())
}
