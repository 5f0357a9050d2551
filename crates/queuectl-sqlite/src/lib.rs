//! SQLite-backed [`JobStore`] for the `queuectl` job queue engine.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id TEXT PRIMARY KEY,
//!     command TEXT NOT NULL,
//!     state TEXT NOT NULL,
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     priority INTEGER NOT NULL DEFAULT 5,
//!     run_at TEXT,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     error_message TEXT,
//!     last_executed_at TEXT
//! );
//!
//! CREATE TABLE job_metrics (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     job_id TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     timestamp TEXT NOT NULL,
//!     duration_ms INTEGER,
//!     error_message TEXT
//! );
//! ```
//!
//! # Claim isolation
//!
//! `claim()` opens its transaction with a raw `BEGIN IMMEDIATE` (via
//! [`sqlx::Pool::begin_with`]) rather than the driver's default deferred
//! `BEGIN`, so the write lock is held from the first statement rather than
//! escalated lazily at the first write -- closing the race window where two
//! concurrent claims could both read the same candidate row before either
//! writes. The pool is opened with WAL journaling and a busy timeout so a
//! transaction that loses the race blocks instead of failing outright with
//! "database is locked".
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl_sqlite::SqliteStore;
//!
//! let store = SqliteStore::open("/home/me/.queuectl/queue.db").await?;
//! let manager = queuectl_core::QueueManager::new(std::sync::Arc::new(store), Default::default());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_core::{
    Job, JobPatch, JobState, JobStore, MetricEvent, MetricEventType, MetricsSummary, NewJob,
    QueueError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor as SqlxExecutor, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// A durable, single-file [`JobStore`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an already-configured pool. Callers who build their own pool are
    /// responsible for WAL mode and a busy timeout; prefer [`Self::open`]
    /// unless you have a reason not to.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }

    /// Open (creating if absent) the database at `path`, apply schema
    /// migrations, and return a ready-to-use store.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = SqliteStore { pool };
        store.ensure_schema().await?;
        tracing::debug!(db_path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    /// The underlying pool, for collaborators that need raw access (e.g. a
    /// janitor sweep for orphaned `processing` rows).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.pool
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    command TEXT NOT NULL,
                    state TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL DEFAULT 3,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    error_message TEXT,
                    last_executed_at TEXT
                )
                "#,
            )
            .await?;

        self.pool
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS job_metrics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    duration_ms INTEGER,
                    error_message TEXT
                )
                "#,
            )
            .await?;

        // Schema-evolution tolerance: older databases may predate these
        // columns. ADD COLUMN on an existing column errors; swallow it.
        for migration in [
            "ALTER TABLE jobs ADD COLUMN priority INTEGER NOT NULL DEFAULT 5",
            "ALTER TABLE jobs ADD COLUMN run_at TEXT",
        ] {
            let _ = self.pool.execute(migration).await;
        }

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(state, priority DESC, created_at ASC)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs(state, run_at)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON job_metrics(timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_job_id ON job_metrics(job_id)",
        ] {
            self.pool.execute(index).await?;
        }

        Ok(())
    }
}

fn storage_err(err: sqlx::Error) -> QueueError {
    tracing::warn!(error = %err, "storage operation failed, transaction rolled back");
    QueueError::Storage(err.into())
}

fn job_from_row(row: &SqliteRow) -> anyhow::Result<Job> {
    let state: String = row.try_get("state")?;
    Ok(Job {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        state: JobState::from_str(&state).map_err(|e| anyhow::anyhow!(e))?,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        priority: row.try_get("priority")?,
        run_at: row.try_get("run_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        error_message: row.try_get("error_message")?,
        last_executed_at: row.try_get("last_executed_at")?,
    })
}

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, priority, run_at, \
     created_at, updated_at, error_message, last_executed_at";

async fn insert_metric<'c, E>(
    executor: E,
    job_id: &str,
    event_type: MetricEventType,
    timestamp: DateTime<Utc>,
    duration_ms: Option<i64>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: SqlxExecutor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO job_metrics (job_id, event_type, timestamp, duration_ms, error_message) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(event_type.as_str())
    .bind(timestamp)
    .bind(duration_ms)
    .bind(error_message)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: NewJob) -> queuectl_core::Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let insert = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, priority, run_at, \
             created_at, updated_at, error_message, last_executed_at) \
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, NULL, NULL)",
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(JobState::Pending.as_str())
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            if err
                .as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false)
            {
                return Err(QueueError::DuplicateJob { id: job.id });
            }
            return Err(storage_err(err));
        }

        insert_metric(
            &mut *tx,
            &job.id,
            MetricEventType::Enqueued,
            now,
            None,
            None,
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        Ok(Job {
            id: job.id,
            command: job.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: job.max_retries,
            priority: job.priority,
            run_at: job.run_at,
            created_at: now,
            updated_at: now,
            error_message: None,
            last_executed_at: None,
        })
    }

    async fn claim(&self) -> queuectl_core::Result<Option<Job>> {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_err)?;
        let now = Utc::now();

        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE state = ? AND (run_at IS NULL OR run_at <= ?) \
             ORDER BY priority DESC, created_at ASC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(JobState::Pending.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(storage_err)?;
            return Ok(None);
        };

        let mut job = job_from_row(&row).map_err(|e| QueueError::Storage(e))?;

        sqlx::query(
            "UPDATE jobs SET state = ?, updated_at = ?, last_executed_at = ? WHERE id = ?",
        )
        .bind(JobState::Processing.as_str())
        .bind(now)
        .bind(now)
        .bind(&job.id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        insert_metric(&mut *tx, &job.id, MetricEventType::Started, now, None, None)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        job.state = JobState::Processing;
        job.updated_at = now;
        job.last_executed_at = Some(now);
        Ok(Some(job))
    }

    async fn update_job(&self, id: &str, patch: JobPatch) -> queuectl_core::Result<()> {
        let current = self.get_job(id).await?.ok_or_else(|| QueueError::JobNotFound {
            id: id.to_string(),
        })?;

        let state = patch.state.unwrap_or(current.state);
        let attempts = patch.attempts.unwrap_or(current.attempts);
        let error_message = patch.error_message.unwrap_or(current.error_message);
        let last_executed_at = patch.last_executed_at.unwrap_or(current.last_executed_at);
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE jobs SET state = ?, attempts = ?, error_message = ?, last_executed_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(attempts)
        .bind(error_message)
        .bind(last_executed_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn get_job(&self, id: &str) -> queuectl_core::Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref()
            .map(job_from_row)
            .transpose()
            .map_err(QueueError::Storage)
    }

    async fn list_jobs(&self, state: Option<JobState>) -> queuectl_core::Result<Vec<Job>> {
        let rows = if let Some(state) = state {
            let query =
                format!("SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at DESC");
            sqlx::query(&query)
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await
        } else {
            let query = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC");
            sqlx::query(&query).fetch_all(&self.pool).await
        }
        .map_err(storage_err)?;

        rows.iter()
            .map(job_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(QueueError::Storage)
    }

    async fn counts_by_state(&self) -> queuectl_core::Result<BTreeMap<JobState, i64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let state: String = row.try_get("state").map_err(|e| storage_err(e))?;
            let n: i64 = row.try_get("n").map_err(|e| storage_err(e))?;
            if let Ok(state) = JobState::from_str(&state) {
                counts.insert(state, n);
            }
        }
        Ok(counts)
    }

    async fn metrics_summary(&self) -> queuectl_core::Result<MetricsSummary> {
        let count_rows =
            sqlx::query("SELECT event_type, COUNT(*) as n FROM job_metrics GROUP BY event_type")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?;

        let mut event_counts = BTreeMap::new();
        for row in count_rows {
            let event_type: String = row.try_get("event_type").map_err(|e| storage_err(e))?;
            let n: i64 = row.try_get("n").map_err(|e| storage_err(e))?;
            if let Ok(event_type) = MetricEventType::from_str(&event_type) {
                event_counts.insert(event_type, n);
            }
        }

        // Pair each `completed` event with the latest preceding `started`
        // event for the same job, then average the numeric (not lexical)
        // difference in seconds.
        let pairs = sqlx::query(
            r#"
            SELECT
                m.timestamp AS completed_ts,
                (
                    SELECT s.timestamp FROM job_metrics s
                    WHERE s.job_id = m.job_id AND s.event_type = 'started'
                      AND s.timestamp <= m.timestamp
                    ORDER BY s.timestamp DESC LIMIT 1
                ) AS started_ts
            FROM job_metrics m
            WHERE m.event_type = 'completed'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut total_seconds = 0f64;
        let mut paired = 0i64;
        for row in &pairs {
            let completed_ts: DateTime<Utc> =
                row.try_get("completed_ts").map_err(|e| storage_err(e))?;
            let started_ts: Option<DateTime<Utc>> =
                row.try_get("started_ts").map_err(|e| storage_err(e))?;
            if let Some(started_ts) = started_ts {
                let delta = completed_ts.signed_duration_since(started_ts);
                total_seconds += delta.num_milliseconds() as f64 / 1000.0;
                paired += 1;
            }
        }
        let avg_duration_seconds = if paired > 0 {
            total_seconds / paired as f64
        } else {
            0.0
        };

        let recent_rows = sqlx::query(
            "SELECT id, job_id, event_type, timestamp, duration_ms, error_message \
             FROM job_metrics ORDER BY timestamp DESC LIMIT 100",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut recent_events = Vec::with_capacity(recent_rows.len());
        for row in recent_rows {
            let event_type: String = row.try_get("event_type").map_err(|e| storage_err(e))?;
            recent_events.push(MetricEvent {
                id: row.try_get("id").map_err(|e| storage_err(e))?,
                job_id: row.try_get("job_id").map_err(|e| storage_err(e))?,
                event_type: MetricEventType::from_str(&event_type)
                    .map_err(|e| QueueError::Storage(anyhow::anyhow!(e)))?,
                timestamp: row.try_get("timestamp").map_err(|e| storage_err(e))?,
                duration_ms: row.try_get("duration_ms").map_err(|e| storage_err(e))?,
                error_message: row.try_get("error_message").map_err(|e| storage_err(e))?,
            });
        }

        Ok(MetricsSummary {
            event_counts,
            avg_duration_seconds,
            recent_events,
        })
    }

    async fn mark_completed(&self, id: &str, duration_ms: Option<i64>) -> queuectl_core::Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query("UPDATE jobs SET state = ?, updated_at = ? WHERE id = ?")
            .bind(JobState::Completed.as_str())
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }

        insert_metric(
            &mut *tx,
            id,
            MetricEventType::Completed,
            now,
            duration_ms,
            None,
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn mark_pending(&self, id: &str, attempts: i64, error: &str) -> queuectl_core::Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query(
            "UPDATE jobs SET state = ?, attempts = ?, error_message = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(JobState::Pending.as_str())
        .bind(attempts)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }

        insert_metric(
            &mut *tx,
            id,
            MetricEventType::Failed,
            now,
            None,
            Some(error),
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn mark_dead(&self, id: &str, attempts: i64, error: &str) -> queuectl_core::Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query(
            "UPDATE jobs SET state = ?, attempts = ?, error_message = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(JobState::Dead.as_str())
        .bind(attempts)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        }

        insert_metric(&mut *tx, id, MetricEventType::Dlq, now, None, Some(error))
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn retry_dlq(&self, id: &str) -> queuectl_core::Result<Job> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let now = Utc::now();

        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })?;

        let job = job_from_row(&row).map_err(QueueError::Storage)?;
        if job.state != JobState::Dead {
            return Err(QueueError::InvalidJobState {
                id: id.to_string(),
                expected: JobState::Dead.to_string(),
                actual: job.state.to_string(),
            });
        }

        sqlx::query(
            "UPDATE jobs SET state = ?, attempts = 0, error_message = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(JobState::Pending.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        Ok(Job {
            state: JobState::Pending,
            attempts: 0,
            error_message: None,
            updated_at: now,
            ..job
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::temp_db_path;
    use std::sync::Arc;

    async fn store() -> (SqliteStore, tempfile::TempDir) {
        let (path, dir) = temp_db_path();
        let store = SqliteStore::open(&path).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_then_claim_round_trips() {
        let (store, _dir) = store().await;
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();

        let claimed = store.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, "j1");
        assert_eq!(claimed.state, JobState::Processing);

        assert!(store.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (store, _dir) = store().await;
        let new = |id: &str| NewJob {
            id: id.into(),
            command: "true".into(),
            max_retries: 3,
            priority: 5,
            run_at: None,
        };
        store.insert_job(new("dup")).await.unwrap();
        let err = store.insert_job(new("dup")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateJob { .. }));
    }

    #[tokio::test]
    async fn claim_respects_priority_order() {
        let (store, _dir) = store().await;
        let new = |id: &str, priority: i64| NewJob {
            id: id.into(),
            command: "true".into(),
            max_retries: 3,
            priority,
            run_at: None,
        };
        store.insert_job(new("low", 2)).await.unwrap();
        store.insert_job(new("high", 9)).await.unwrap();
        store.insert_job(new("medium", 5)).await.unwrap();

        let first = store.claim().await.unwrap().unwrap();
        let second = store.claim().await.unwrap().unwrap();
        let third = store.claim().await.unwrap().unwrap();
        assert_eq!(
            vec![first.id, second.id, third.id],
            vec!["high", "medium", "low"]
        );
    }

    #[tokio::test]
    async fn ready_time_respected() {
        let (store, _dir) = store().await;
        let future = Utc::now() + chrono::Duration::hours(1);
        store
            .insert_job(NewJob {
                id: "future".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: Some(future),
            })
            .await
            .unwrap();
        assert!(store.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ready_job_becomes_claimable_once_run_at_passes() {
        let (store, _dir) = store().await;
        let run_at = Utc::now() + chrono::Duration::milliseconds(50);
        store
            .insert_job(NewJob {
                id: "future".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: Some(run_at),
            })
            .await
            .unwrap();
        assert!(store.claim().await.unwrap().is_none());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let claimed = store.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, "future");
        assert_eq!(claimed.state, JobState::Processing);
    }

    #[tokio::test]
    async fn dlq_round_trip() {
        let (store, _dir) = store().await;
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "false".into(),
                max_retries: 0,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();
        store.claim().await.unwrap();
        store.mark_dead("j1", 1, "boom").await.unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);

        let retried = store.retry_dlq("j1").await.unwrap();
        assert_eq!(retried.state, JobState::Pending);
        assert_eq!(retried.attempts, 0);
        assert!(retried.error_message.is_none());

        let reclaimed = store.claim().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, "j1");
    }

    #[tokio::test]
    async fn dead_lettered_only_after_retries_exhausted() {
        let (store, _dir) = store().await;
        store
            .insert_job(NewJob {
                id: "fail_job".into(),
                command: "false".into(),
                max_retries: 2,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();

        // attempt 1: fails, retries left (attempts=1 <= max_retries=2) -> pending
        store.claim().await.unwrap();
        store.mark_pending("fail_job", 1, "boom").await.unwrap();
        let job = store.get_job("fail_job").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);

        // attempt 2: fails, retries left (attempts=2 <= max_retries=2) -> pending
        store.claim().await.unwrap();
        store.mark_pending("fail_job", 2, "boom").await.unwrap();
        let job = store.get_job("fail_job").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);

        // attempt 3: fails, retries exhausted (attempts=3 > max_retries=2) -> dead
        store.claim().await.unwrap();
        store.mark_dead("fail_job", 3, "boom").await.unwrap();

        let dead = store.list_jobs(Some(JobState::Dead)).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "fail_job");
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn retry_dlq_rejects_non_dead_state() {
        let (store, _dir) = store().await;
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();
        let err = store.retry_dlq("j1").await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidJobState { .. }));
    }

    #[tokio::test]
    async fn durability_across_reopen() {
        let (path, _dir) = temp_db_path();
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .insert_job(NewJob {
                    id: "p1".into(),
                    command: "true".into(),
                    max_retries: 3,
                    priority: 5,
                    run_at: None,
                })
                .await
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).await.unwrap();
        let jobs = reopened.list_jobs(Some(JobState::Pending)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "p1");
    }

    #[tokio::test]
    async fn contended_claim_hands_out_each_job_exactly_once() {
        let (path, _dir) = temp_db_path();
        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        for i in 0..20 {
            store
                .insert_job(NewJob {
                    id: format!("job-{i}"),
                    command: "true".into(),
                    max_retries: 3,
                    priority: 5,
                    run_at: None,
                })
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match store.claim().await.unwrap() {
                        Some(job) => claimed.push(job.id),
                        None => break,
                    }
                }
                claimed
            }));
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.await.unwrap());
        }
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), 20);
    }

    #[tokio::test]
    async fn metrics_summary_computes_average_duration_numerically() {
        let (store, _dir) = store().await;
        store
            .insert_job(NewJob {
                id: "j1".into(),
                command: "true".into(),
                max_retries: 3,
                priority: 5,
                run_at: None,
            })
            .await
            .unwrap();
        store.claim().await.unwrap();
        store.mark_completed("j1", Some(2_000)).await.unwrap();

        let summary = store.metrics_summary().await.unwrap();
        assert!(summary.avg_duration_seconds >= 0.0);
        assert_eq!(summary.event_counts[&MetricEventType::Completed], 1);
        assert_eq!(summary.event_counts[&MetricEventType::Started], 1);
    }
}
