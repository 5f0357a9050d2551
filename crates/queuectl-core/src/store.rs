//! The storage capability the queue manager is built against.
//!
//! `JobStore` is the seam between the engine's state machine and whatever
//! durable backend holds it -- a single-file SQLite database in this
//! workspace's [`queuectl-sqlite`](https://docs.rs/queuectl-sqlite), but the
//! trait itself says nothing about SQL, files, or any particular isolation
//! mechanism. Implementations must provide two guarantees: `claim` is atomic
//! with respect to other concurrent `claim` calls, and every `mark_*`
//! operation appends its metric event in the same transaction as the state
//! write it performs.

use crate::error::Result;
use crate::model::{Job, JobPatch, JobState, MetricsSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Fields accepted by [`JobStore::insert_job`]; deliberately narrower than
/// [`Job`] because `state`, `attempts`, `created_at`/`updated_at` and
/// `last_executed_at` are the store's (or the manager's) to decide, not the
/// caller's.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub max_retries: i64,
    pub priority: i64,
    pub run_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `Pending` state and append an `enqueued` metric,
    /// atomically. Fails with `DuplicateJob` if `id` already exists.
    async fn insert_job(&self, job: NewJob) -> Result<Job>;

    /// Atomically select the highest-priority, oldest, ready pending job,
    /// transition it to `Processing`, append a `started` metric, and return
    /// it. Returns `None` if no job is eligible.
    async fn claim(&self) -> Result<Option<Job>>;

    /// Apply a partial update to a job row. Does not append a metric event;
    /// callers that need one should use the `mark_*` operations instead.
    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    async fn counts_by_state(&self) -> Result<BTreeMap<JobState, i64>>;

    async fn metrics_summary(&self) -> Result<MetricsSummary>;

    /// Transition `id` to `Completed` and append a `completed` metric with
    /// the optional duration, atomically.
    async fn mark_completed(&self, id: &str, duration_ms: Option<i64>) -> Result<()>;

    /// Return `id` to `Pending` with the given attempt count and error
    /// message, and append a `failed` metric, atomically. The caller (the
    /// worker) is responsible for having already slept the backoff.
    async fn mark_pending(&self, id: &str, attempts: i64, error: &str) -> Result<()>;

    /// Transition `id` to `Dead` with the given attempt count and error
    /// message, and append a `dlq` metric, atomically.
    async fn mark_dead(&self, id: &str, attempts: i64, error: &str) -> Result<()>;

    /// Reset a `Dead` job to `Pending` with `attempts = 0` and no error
    /// message. Fails with `JobNotFound` if absent, `InvalidJobState` if the
    /// current state is not `Dead`. Returns the updated job.
    async fn retry_dlq(&self, id: &str) -> Result<Job>;
}
