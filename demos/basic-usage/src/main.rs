//! # Basic Usage
//!
//! Opens a SQLite-backed queue, enqueues a handful of jobs spanning
//! priorities and a delayed one, starts a small thread-backed worker pool,
//! lets it drain the queue, then stops it gracefully and prints final stats.

use anyhow::Result;
use queuectl_core::{Config, QueueManager, ShellExecutor, WorkerPool};
use queuectl_sqlite::SqliteStore;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let db_path = std::env::temp_dir().join("queuectl-basic-usage.db");
    let store = Arc::new(SqliteStore::open(&db_path).await?);
    let config = Config {
        worker_poll_interval_secs: 0.2,
        ..Config::default()
    };
    let manager = QueueManager::new(store, config);

    println!("Enqueuing jobs at db {}", db_path.display());
    manager
        .enqueue("low-priority", "echo low", None, Some(2), None)
        .await?;
    manager
        .enqueue("high-priority", "echo high", None, Some(9), None)
        .await?;
    manager
        .enqueue("will-fail", "exit 1", Some(1), None, None)
        .await?;

    let executor = Arc::new(ShellExecutor::new());
    let pool = WorkerPool::start(2, manager.clone(), executor);

    println!("Draining queue...");
    tokio::time::sleep(Duration::from_secs(2)).await;
    pool.stop().await;

    let stats = manager.get_stats().await?;
    println!("Final stats: {stats:?}");

    let dlq = manager.list_jobs(Some(queuectl_core::JobState::Dead)).await?;
    println!("Dead-lettered jobs: {}", dlq.len());

    Ok(())
}
