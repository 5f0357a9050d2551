//! Test fixtures for the queuectl workspace.
//!
//! `InMemoryStore` implements [`JobStore`] entirely in memory so that
//! `queuectl-core`'s own unit tests can exercise the queue manager's
//! validation logic without depending on `queuectl-sqlite` (avoiding a
//! dependency cycle, since `queuectl-sqlite` itself depends on
//! `queuectl-core`). It deliberately mirrors the claim ordering and
//! transition rules of the real store so that tests written against it stay
//! meaningful, but it is not a substitute for the SQLite-backed concurrency
//! tests in `queuectl-sqlite`, which are the ones that actually exercise
//! write-lock contention.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_core::error::{QueueError, Result};
use queuectl_core::model::{
    Job, JobPatch, JobState, MetricEvent, MetricEventType, MetricsSummary,
};
use queuectl_core::store::{JobStore, NewJob};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// An in-memory, single-process stand-in for the durable store.
///
/// Internally serialized by a single mutex, so -- unlike the SQLite store --
/// it has no concept of a waiting second transaction re-observing updated
/// state; every operation simply runs to completion under the lock. That
/// makes it unsuitable for proving the no-double-claim property under real
/// contention, but perfectly adequate for the manager-level validation tests
/// it's used for.
pub struct InMemoryStore {
    inner: Mutex<State>,
}

struct State {
    jobs: BTreeMap<String, Job>,
    metrics: Vec<MetricEvent>,
    next_metric_id: i64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            inner: Mutex::new(State {
                jobs: BTreeMap::new(),
                metrics: Vec::new(),
                next_metric_id: 1,
            }),
        }
    }

    fn record_metric(
        state: &mut State,
        job_id: &str,
        event_type: MetricEventType,
        duration_ms: Option<i64>,
        error_message: Option<String>,
    ) {
        let id = state.next_metric_id;
        state.next_metric_id += 1;
        state.metrics.push(MetricEvent {
            id,
            job_id: job_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            duration_ms,
            error_message,
        });
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, new_job: NewJob) -> Result<Job> {
        let mut state = self.inner.lock().unwrap();
        if state.jobs.contains_key(&new_job.id) {
            return Err(QueueError::DuplicateJob { id: new_job.id });
        }
        let now = Utc::now();
        let job = Job::new(
            new_job.id.clone(),
            new_job.command,
            new_job.max_retries,
            new_job.priority,
            new_job.run_at,
            now,
        );
        state.jobs.insert(job.id.clone(), job.clone());
        Self::record_metric(&mut state, &job.id, MetricEventType::Enqueued, None, None);
        Ok(job)
    }

    async fn claim(&self) -> Result<Option<Job>> {
        let mut state = self.inner.lock().unwrap();
        let now = Utc::now();
        let candidate_id = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending && j.is_ready_to_run(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|j| j.id.clone());

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let job = state.jobs.get_mut(&id).unwrap();
        job.state = JobState::Processing;
        job.updated_at = now;
        job.last_executed_at = Some(now);
        let claimed = job.clone();
        Self::record_metric(&mut state, &id, MetricEventType::Started, None, None);
        Ok(Some(claimed))
    }

    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
        if let Some(s) = patch.state {
            job.state = s;
        }
        if let Some(a) = patch.attempts {
            job.attempts = a;
        }
        if let Some(e) = patch.error_message {
            job.error_message = e;
        }
        if let Some(t) = patch.last_executed_at {
            job.last_executed_at = t;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(id).cloned())
    }

    async fn list_jobs(&self, state_filter: Option<JobState>) -> Result<Vec<Job>> {
        let state = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| state_filter.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn counts_by_state(&self) -> Result<BTreeMap<JobState, i64>> {
        let state = self.inner.lock().unwrap();
        let mut counts = BTreeMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn metrics_summary(&self) -> Result<MetricsSummary> {
        let state = self.inner.lock().unwrap();
        let mut event_counts = BTreeMap::new();
        for event in &state.metrics {
            *event_counts.entry(event.event_type).or_insert(0) += 1;
        }

        let mut latest_started: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        let mut durations = Vec::new();
        for event in &state.metrics {
            match event.event_type {
                MetricEventType::Started => {
                    latest_started.insert(&event.job_id, event.timestamp);
                }
                MetricEventType::Completed => {
                    if let Some(started_at) = latest_started.get(event.job_id.as_str()) {
                        let delta = (event.timestamp - *started_at).num_milliseconds() as f64
                            / 1000.0;
                        durations.push(delta);
                    }
                }
                _ => {}
            }
        }
        let avg_duration_seconds = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let mut recent_events: Vec<MetricEvent> = state.metrics.clone();
        recent_events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent_events.truncate(100);

        Ok(MetricsSummary {
            event_counts,
            avg_duration_seconds,
            recent_events,
        })
    }

    async fn mark_completed(&self, id: &str, duration_ms: Option<i64>) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        {
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
            job.state = JobState::Completed;
            job.updated_at = Utc::now();
        }
        Self::record_metric(&mut state, id, MetricEventType::Completed, duration_ms, None);
        Ok(())
    }

    async fn mark_pending(&self, id: &str, attempts: i64, error: &str) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        {
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
            job.state = JobState::Pending;
            job.attempts = attempts;
            job.error_message = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Self::record_metric(
            &mut state,
            id,
            MetricEventType::Failed,
            None,
            Some(error.to_string()),
        );
        Ok(())
    }

    async fn mark_dead(&self, id: &str, attempts: i64, error: &str) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        {
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
            job.state = JobState::Dead;
            job.attempts = attempts;
            job.error_message = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Self::record_metric(
            &mut state,
            id,
            MetricEventType::Dlq,
            None,
            Some(error.to_string()),
        );
        Ok(())
    }

    async fn retry_dlq(&self, id: &str) -> Result<Job> {
        let mut state = self.inner.lock().unwrap();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;
        if job.state != JobState::Dead {
            return Err(QueueError::InvalidJobState {
                id: id.to_string(),
                expected: JobState::Dead.to_string(),
                actual: job.state.to_string(),
            });
        }
        job.state = JobState::Pending;
        job.attempts = 0;
        job.error_message = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

/// A deterministic [`queuectl_core::executor::Executor`] for worker tests:
/// returns canned outcomes for specific commands instead of spawning a real
/// shell, and records every command it was asked to run.
pub struct ScriptedExecutor {
    outcomes: Mutex<BTreeMap<String, Vec<(bool, String)>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        ScriptedExecutor {
            outcomes: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes to be returned, in order, for `command`. Once
    /// exhausted, further calls for that command return `(true, "")`.
    pub fn script(&self, command: impl Into<String>, outcomes: Vec<(bool, &str)>) {
        self.outcomes.lock().unwrap().insert(
            command.into(),
            outcomes
                .into_iter()
                .map(|(ok, msg)| (ok, msg.to_string()))
                .collect(),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl queuectl_core::executor::Executor for ScriptedExecutor {
    async fn execute(
        &self,
        command: &str,
        _timeout: std::time::Duration,
    ) -> queuectl_core::executor::ExecutionOutcome {
        self.calls.lock().unwrap().push(command.to_string());
        let mut outcomes = self.outcomes.lock().unwrap();
        if let Some(queue) = outcomes.get_mut(command) {
            if !queue.is_empty() {
                let (success, error) = queue.remove(0);
                return queuectl_core::executor::ExecutionOutcome { success, error };
            }
        }
        queuectl_core::executor::ExecutionOutcome {
            success: true,
            error: String::new(),
        }
    }
}

/// A unique, readable job id for tests, e.g. `job-a1b2c3`.
pub fn unique_job_id(prefix: &str) -> String {
    format!("{prefix}-{:06x}", fastrand::u32(..))
}

/// A temp-file path suitable for a throwaway SQLite database, plus a guard
/// that deletes the containing directory when dropped.
pub fn temp_db_path() -> (std::path::PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir for test database");
    let path = dir.path().join("queue.db");
    (path, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_respects_priority_then_fifo() {
        let store = InMemoryStore::new();
        store
            .insert_job(NewJob {
                id: "low".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 2,
                run_at: None,
            })
            .await
            .unwrap();
        store
            .insert_job(NewJob {
                id: "high".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 9,
                run_at: None,
            })
            .await
            .unwrap();
        store
            .insert_job(NewJob {
                id: "medium".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();

        assert_eq!(store.claim().await.unwrap().unwrap().id, "high");
        assert_eq!(store.claim().await.unwrap().unwrap().id, "medium");
        assert_eq!(store.claim().await.unwrap().unwrap().id, "low");
        assert!(store.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let store = InMemoryStore::new();
        for id in ["first", "second", "third"] {
            store
                .insert_job(NewJob {
                    id: id.into(),
                    command: "true".into(),
                    max_retries: 3,
                    priority: 5,
                    run_at: None,
                })
                .await
                .unwrap();
            // force distinct created_at so the tie-break has something to break
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(store.claim().await.unwrap().unwrap().id, "first");
        assert_eq!(store.claim().await.unwrap().unwrap().id, "second");
        assert_eq!(store.claim().await.unwrap().unwrap().id, "third");
    }
}
