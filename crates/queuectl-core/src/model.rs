//! Core data model: jobs, their lifecycle state, and metric events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The minimum and maximum allowed values for `Job::priority`.
pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 10;
pub const DEFAULT_PRIORITY: i64 = 5;

/// A job's position in its lifecycle.
///
/// `Failed` exists for schema completeness but is never the persisted state
/// of a row on the normal path: a failed attempt either returns a job to
/// `Pending` (retry left) or moves it to `Dead` (retries exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub priority: i64,
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a brand-new job in `Pending` state, stamped with `now`.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: i64,
        priority: i64,
        run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Job {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            priority,
            run_at,
            created_at: now,
            updated_at: now,
            error_message: None,
            last_executed_at: None,
        }
    }

    /// Whether another attempt is owed after `attempts` failed executions.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Exponential backoff delay in seconds: `base ^ attempts`.
    ///
    /// Evaluated with `attempts` as the pre-increment failure count, so the
    /// first retry (`attempts == 0` at the time of the failing attempt, then
    /// incremented to 1 before this is called with `attempts - 1`... see
    /// `Worker::run`) waits `base^0 == 1s`.
    pub fn calculate_backoff(&self, base: f64) -> f64 {
        base.powi(self.attempts as i32)
    }

    /// Whether a scheduled job is ready to be claimed at `now`.
    pub fn is_ready_to_run(&self, now: DateTime<Utc>) -> bool {
        match self.run_at {
            None => true,
            Some(run_at) => now >= run_at,
        }
    }
}

/// The kind of lifecycle transition a metric event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricEventType {
    Enqueued,
    Started,
    Completed,
    Failed,
    Dlq,
}

impl MetricEventType {
    pub const ALL: [MetricEventType; 5] = [
        MetricEventType::Enqueued,
        MetricEventType::Started,
        MetricEventType::Completed,
        MetricEventType::Failed,
        MetricEventType::Dlq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricEventType::Enqueued => "enqueued",
            MetricEventType::Started => "started",
            MetricEventType::Completed => "completed",
            MetricEventType::Failed => "failed",
            MetricEventType::Dlq => "dlq",
        }
    }
}

impl fmt::Display for MetricEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(MetricEventType::Enqueued),
            "started" => Ok(MetricEventType::Started),
            "completed" => Ok(MetricEventType::Completed),
            "failed" => Ok(MetricEventType::Failed),
            "dlq" => Ok(MetricEventType::Dlq),
            other => Err(format!("unknown metric event type '{other}'")),
        }
    }
}

/// An append-only record of a single job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub id: i64,
    pub job_id: String,
    pub event_type: MetricEventType,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// Aggregated view over the metric event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub event_counts: BTreeMap<MetricEventType, i64>,
    /// Mean `completed.timestamp - started.timestamp` over jobs with both
    /// events, in whole seconds. Named explicitly with its unit because the
    /// naive version of this query (differencing ISO-8601 text) does not
    /// produce a duration at all.
    pub avg_duration_seconds: f64,
    /// Most recent events, newest first, capped at 100.
    pub recent_events: Vec<MetricEvent>,
}

/// Zero-filled counts of jobs by state.
pub fn zero_filled_counts(counts: BTreeMap<JobState, i64>) -> BTreeMap<JobState, i64> {
    let mut filled: BTreeMap<JobState, i64> = JobState::ALL.iter().map(|s| (*s, 0)).collect();
    for (state, count) in counts {
        filled.insert(state, count);
    }
    filled
}

/// Partial update applied to a job row by the store's generic `update_job`.
///
/// Every field is optional; only `Some` fields are written. This is the
/// low-level primitive the store exposes for administrative patches. The
/// higher-level `mark_*` operations on [`crate::store::JobStore`] do not
/// route through this -- they need to append a metric event in the same
/// transaction as the row update, which a purely generic field-set update
/// cannot express.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub attempts: Option<i64>,
    pub error_message: Option<Option<String>>,
    pub last_executed_at: Option<Option<DateTime<Utc>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_base_to_the_attempts() {
        let job = Job::new("j", "true", 3, 5, None, Utc::now());
        assert_eq!(job.calculate_backoff(2.0), 1.0);
        let mut job = job;
        job.attempts = 1;
        assert_eq!(job.calculate_backoff(2.0), 2.0);
        job.attempts = 2;
        assert_eq!(job.calculate_backoff(2.0), 4.0);
    }

    #[test]
    fn should_retry_is_strict_less_than() {
        let mut job = Job::new("j", "true", 2, 5, None, Utc::now());
        job.attempts = 1;
        assert!(job.should_retry());
        job.attempts = 2;
        assert!(!job.should_retry());
    }

    #[test]
    fn ready_to_run_respects_run_at() {
        let now = Utc::now();
        let mut job = Job::new("j", "true", 2, 5, Some(now + chrono::Duration::hours(1)), now);
        assert!(!job.is_ready_to_run(now));
        job.run_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_ready_to_run(now));
    }

    #[test]
    fn zero_filled_counts_includes_absent_states() {
        let mut counts = BTreeMap::new();
        counts.insert(JobState::Pending, 3);
        let filled = zero_filled_counts(counts);
        assert_eq!(filled.len(), JobState::ALL.len());
        assert_eq!(filled[&JobState::Dead], 0);
        assert_eq!(filled[&JobState::Pending], 3);
    }
}
