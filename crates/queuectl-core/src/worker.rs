//! A single worker's claim → execute → commit loop.

use crate::config::Config;
use crate::executor::Executor;
use crate::manager::QueueManager;
use crate::store::JobStore;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

/// How long since its last heartbeat a worker is still considered alive.
const HEALTH_STALE_AFTER_MS: i64 = 60_000;

/// Heartbeat and throughput counters for one worker, shared with whatever
/// holds the worker (normally [`crate::pool::WorkerPool`]) so a health query
/// doesn't need to talk to the worker's own task.
pub struct WorkerHealth {
    worker_id: usize,
    last_heartbeat_unix_ms: AtomicI64,
    jobs_processed: AtomicU64,
}

/// A point-in-time snapshot of [`WorkerHealth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHealthStatus {
    pub worker_id: usize,
    pub last_heartbeat_unix_ms: i64,
    pub jobs_processed: u64,
    pub alive: bool,
}

impl WorkerHealth {
    fn new(worker_id: usize) -> Arc<Self> {
        Arc::new(WorkerHealth {
            worker_id,
            last_heartbeat_unix_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            jobs_processed: AtomicU64::new(0),
        })
    }

    fn beat(&self) {
        self.last_heartbeat_unix_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn record_job(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.beat();
    }

    /// Current health as of now. `alive` is false once the heartbeat is
    /// older than [`HEALTH_STALE_AFTER_MS`].
    pub fn snapshot(&self) -> WorkerHealthStatus {
        let last = self.last_heartbeat_unix_ms.load(Ordering::Relaxed);
        let age_ms = Utc::now().timestamp_millis() - last;
        WorkerHealthStatus {
            worker_id: self.worker_id,
            last_heartbeat_unix_ms: last,
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            alive: age_ms < HEALTH_STALE_AFTER_MS,
        }
    }
}

/// One sequential worker. Never has more than one job in flight; parallelism
/// comes from running several of these (see [`crate::pool::WorkerPool`]).
pub struct Worker<S, E> {
    id: usize,
    manager: QueueManager<S>,
    executor: Arc<E>,
    config: Config,
    shutdown: watch::Receiver<bool>,
    health: Arc<WorkerHealth>,
}

impl<S: JobStore, E: Executor> Worker<S, E> {
    pub fn new(
        id: usize,
        manager: QueueManager<S>,
        executor: Arc<E>,
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Worker {
            id,
            manager,
            executor,
            config,
            shutdown,
            health: WorkerHealth::new(id),
        }
    }

    /// Shared heartbeat/throughput counters for this worker. The handle
    /// stays valid after the worker task exits; its last snapshot simply
    /// stops moving.
    pub fn health(&self) -> Arc<WorkerHealth> {
        self.health.clone()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration`, waking early if shutdown is signalled. Returns
    /// `true` if the sleep completed normally, `false` if it was cut short
    /// by shutdown.
    async fn interruptible_sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.changed() => false,
        }
    }

    /// Run until shutdown is signalled.
    #[instrument(skip(self), fields(worker_id = self.id))]
    pub async fn run(&mut self) {
        tracing::info!(worker_id = self.id, "worker started");
        while !self.is_shutting_down() {
            self.health.beat();
            match self.manager.claim_job().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    self.interruptible_sleep(Duration::from_secs_f64(
                        self.config.worker_poll_interval_secs,
                    ))
                    .await;
                }
                Err(err) => {
                    tracing::error!(worker_id = self.id, error = %err, "store error while claiming, retrying shortly");
                    self.interruptible_sleep(Duration::from_secs(1)).await;
                }
            }
        }
        tracing::info!(worker_id = self.id, "worker shutting down gracefully");
    }

    async fn process(&mut self, job: crate::model::Job) {
        self.health.record_job();
        tracing::info!(worker_id = self.id, job_id = %job.id, command = %job.command, "processing job");
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let started = std::time::Instant::now();
        let outcome = self.executor.execute(&job.command, timeout).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        if outcome.success {
            if let Err(err) = self.manager.mark_completed(&job.id, Some(duration_ms)).await {
                tracing::error!(worker_id = self.id, job_id = %job.id, error = %err, "failed to record completion");
            }
            return;
        }

        let attempts = job.attempts + 1;
        if attempts <= job.max_retries {
            let backoff_secs = self.config.backoff_base.powi((attempts - 1) as i32);
            tracing::warn!(
                worker_id = self.id,
                job_id = %job.id,
                attempts,
                backoff_secs,
                error = %outcome.error,
                "job failed, retrying after backoff"
            );
            self.interruptible_sleep(Duration::from_secs_f64(backoff_secs))
                .await;
            if let Err(err) = self
                .manager
                .mark_pending(&job.id, attempts, &outcome.error)
                .await
            {
                tracing::error!(worker_id = self.id, job_id = %job.id, error = %err, "failed to record retry");
            }
        } else {
            tracing::error!(
                worker_id = self.id,
                job_id = %job.id,
                attempts,
                error = %outcome.error,
                "job exhausted retries, moving to dead-letter queue"
            );
            if let Err(err) = self.manager.mark_dead(&job.id, attempts, &outcome.error).await {
                tracing::error!(worker_id = self.id, job_id = %job.id, error = %err, "failed to record dead-letter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::{InMemoryStore, ScriptedExecutor};

    fn manager(store: Arc<InMemoryStore>) -> QueueManager<InMemoryStore> {
        QueueManager::new(store, Config::default())
    }

    #[tokio::test]
    async fn successful_job_is_marked_completed() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store.clone());
        mgr.enqueue("j1", "true", None, None, None).await.unwrap();

        let executor = Arc::new(ScriptedExecutor::new());
        let (_tx, rx) = watch::channel(false);
        let mut worker = Worker::new(0, mgr.clone(), executor, Config::default(), rx);

        let job = mgr.claim_job().await.unwrap().unwrap();
        worker.process(job).await;

        let job = mgr.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, crate::model::JobState::Completed);
    }

    #[tokio::test]
    async fn failing_job_with_retries_left_goes_back_to_pending() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store.clone());
        mgr.enqueue("j1", "boom", Some(2), None, None)
            .await
            .unwrap();

        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("boom", vec![(false, "exploded")]);
        let (_tx, rx) = watch::channel(false);
        let mut worker = Worker::new(0, mgr.clone(), executor, Config::default(), rx);

        let job = mgr.claim_job().await.unwrap().unwrap();
        worker.process(job).await;

        let job = mgr.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, crate::model::JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message.as_deref(), Some("exploded"));
    }

    #[tokio::test]
    async fn failing_job_past_max_retries_is_dead_lettered() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store.clone());
        mgr.enqueue("j1", "boom", Some(0), None, None)
            .await
            .unwrap();

        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("boom", vec![(false, "exploded")]);
        let (_tx, rx) = watch::channel(false);
        let mut worker = Worker::new(0, mgr.clone(), executor, Config::default(), rx);

        let job = mgr.claim_job().await.unwrap().unwrap();
        worker.process(job).await;

        let job = mgr.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, crate::model::JobState::Dead);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn shutdown_signal_cuts_poll_sleep_short() {
        // run() would block ~30s on the poll sleep unless shutdown wakes it.
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store);
        let executor = Arc::new(ScriptedExecutor::new());
        let (tx, rx) = watch::channel(false);
        let mut cfg = Config::default();
        cfg.worker_poll_interval_secs = 30.0;
        let mut worker = Worker::new(0, mgr, executor, cfg, rx);

        let run_handle = tokio::spawn(async move {
            worker.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), run_handle)
            .await
            .expect("worker should exit promptly after shutdown signal")
            .unwrap();
    }
}
