//! The queue manager: a thin, validating façade over a [`JobStore`].

use crate::config::Config;
use crate::error::{QueueError, Result};
use crate::model::{
    Job, JobState, MetricsSummary, MAX_PRIORITY, MIN_PRIORITY,
};
use crate::store::{JobStore, NewJob};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Public contract used by clients (CLI, HTTP dashboard) and workers alike.
///
/// `QueueManager` owns state-transition validation; the store underneath it
/// is trusted to execute what it's told atomically, but it is the manager
/// that decides, for instance, that `retry_dlq_job` is only legal from
/// `Dead`.
#[derive(Clone)]
pub struct QueueManager<S> {
    store: Arc<S>,
    config: Config,
}

impl<S: JobStore> QueueManager<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        QueueManager { store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Enqueue a new job. `max_retries` defaults to `config.max_retries`;
    /// `priority` defaults to `DEFAULT_PRIORITY` (5). An out-of-range
    /// priority is rejected, never clamped.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn enqueue(
        &self,
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: Option<i64>,
        priority: Option<i64>,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let priority = priority.unwrap_or(crate::model::DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(QueueError::InvalidPriority { value: priority });
        }

        let job = NewJob {
            id: id.into(),
            command: command.into(),
            max_retries: max_retries.unwrap_or(self.config.max_retries),
            priority,
            run_at,
        };

        let created = self.store.insert_job(job).await?;
        tracing::info!(job_id = %created.id, priority = created.priority, "job enqueued");
        Ok(created)
    }

    /// Atomically claim the next eligible pending job, if any.
    pub async fn claim_job(&self) -> Result<Option<Job>> {
        let job = self.store.claim().await?;
        if let Some(job) = &job {
            tracing::info!(job_id = %job.id, priority = job.priority, "job claimed");
        }
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.store.list_jobs(state).await
    }

    /// Mark a job completed. `duration_ms`, if given, is attached to the
    /// `completed` metric event.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn mark_completed(&self, id: &str, duration_ms: Option<i64>) -> Result<()> {
        self.store.mark_completed(id, duration_ms).await?;
        tracing::info!(job_id = %id, duration_ms, "job completed");
        Ok(())
    }

    /// Return a job to `Pending` after a failed attempt that still has
    /// retries left. The caller is responsible for having already slept the
    /// backoff delay.
    #[instrument(skip(self, error), fields(job_id = %id))]
    pub async fn mark_pending(&self, id: &str, attempts: i64, error: &str) -> Result<()> {
        self.store.mark_pending(id, attempts, error).await?;
        tracing::warn!(job_id = %id, attempts, error, "job returned to pending for retry");
        Ok(())
    }

    /// Move a job to the dead-letter queue after retries are exhausted.
    #[instrument(skip(self, error), fields(job_id = %id))]
    pub async fn mark_dead(&self, id: &str, attempts: i64, error: &str) -> Result<()> {
        self.store.mark_dead(id, attempts, error).await?;
        tracing::error!(job_id = %id, attempts, error, "job moved to dead-letter queue");
        Ok(())
    }

    /// Reset a dead-lettered job back to `Pending` with `attempts = 0`.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry_dlq_job(&self, id: &str) -> Result<Job> {
        let job = self.store.retry_dlq(id).await?;
        tracing::info!(job_id = %id, "job reset from dead-letter queue to pending");
        Ok(job)
    }

    /// Counts of jobs by state, zero-filled for states with no rows.
    pub async fn get_stats(&self) -> Result<BTreeMap<JobState, i64>> {
        let counts = self.store.counts_by_state().await?;
        Ok(crate::model::zero_filled_counts(counts))
    }

    pub async fn get_metrics(&self) -> Result<MetricsSummary> {
        self.store.metrics_summary().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::InMemoryStore;

    fn manager() -> QueueManager<InMemoryStore> {
        QueueManager::new(Arc::new(InMemoryStore::new()), Config::default())
    }

    #[tokio::test]
    async fn enqueue_rejects_out_of_range_priority() {
        let mgr = manager();
        let err = mgr
            .enqueue("j1", "true", None, Some(11), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority { value: 11 }));

        let err = mgr
            .enqueue("j2", "true", None, Some(0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority { value: 0 }));
    }

    #[tokio::test]
    async fn enqueue_defaults_priority_and_retries() {
        let mgr = manager();
        let job = mgr.enqueue("j1", "true", None, None, None).await.unwrap();
        assert_eq!(job.priority, crate::model::DEFAULT_PRIORITY);
        assert_eq!(job.max_retries, mgr.config().max_retries);
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn retry_dlq_requires_dead_state() {
        let mgr = manager();
        mgr.enqueue("j1", "true", None, None, None).await.unwrap();
        let err = mgr.retry_dlq_job("j1").await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidJobState { .. }));
    }

    #[tokio::test]
    async fn retry_dlq_unknown_job_not_found() {
        let mgr = manager();
        let err = mgr.retry_dlq_job("nope").await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn stats_are_zero_filled() {
        let mgr = manager();
        let stats = mgr.get_stats().await.unwrap();
        assert_eq!(stats.len(), JobState::ALL.len());
        assert_eq!(stats[&JobState::Pending], 0);
    }
}
