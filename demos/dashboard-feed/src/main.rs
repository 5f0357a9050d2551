//! # Dashboard Feed
//!
//! A stand-in for the out-of-scope HTTP dashboard: a read-mostly client that
//! polls `get_stats`/`get_metrics` on a running queue and prints a feed of
//! state-count snapshots and recent lifecycle events, the way a real
//! dashboard backend would refresh its view between requests.

use anyhow::Result;
use queuectl_core::{Config, QueueManager};
use queuectl_sqlite::SqliteStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/queuectl-basic-usage.db".to_string());
    let store = Arc::new(SqliteStore::open(&db_path).await?);
    let manager = QueueManager::new(store, Config::default());

    println!("Polling queue at {db_path}");
    for _ in 0..5 {
        let stats = manager.get_stats().await?;
        println!("stats: {stats:?}");

        let metrics = manager.get_metrics().await?;
        println!(
            "avg_duration_seconds={:.3} recent_events={}",
            metrics.avg_duration_seconds,
            metrics.recent_events.len()
        );
        for event in metrics.recent_events.iter().take(5) {
            println!(
                "  {} job={} at={}",
                event.event_type, event.job_id, event.timestamp
            );
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    Ok(())
}
