//! # queuectl-core
//!
//! The engine at the center of `queuectl`: a durable, single-node background
//! job queue with at-most-once concurrent execution per job, priority-aware
//! scheduling, delayed execution, exponential-backoff retries, and a
//! dead-letter queue for terminal failures.
//!
//! ## Architecture
//!
//! ```text
//! enqueue() ──────────────────────────────────┐
//!                                              ▼
//!                                        JobStore (durable)
//!                                              ▲
//!                    ┌─────────────────────────┤
//!                    │                         │
//!              claim_job()               mark_completed()
//!                    │                   mark_pending() / mark_dead()
//!                    ▼                         ▲
//!               Worker loop ──execute()──► Executor
//!                    ▲
//!          ┌─────────┴─────────┐
//!        Worker 1 ... Worker N   (WorkerPool: threads or processes)
//! ```
//!
//! ## Core Concepts
//!
//! - [`model::Job`] / [`model::JobState`] — the unit of work and its closed
//!   state machine (`pending → processing → {completed, pending, dead}`).
//! - [`store::JobStore`] — the durable storage capability. This crate ships
//!   no implementation of it; `queuectl-sqlite` does, and
//!   `queuectl-testing::InMemoryStore` stands in for tests.
//! - [`manager::QueueManager`] — the validating façade clients and workers
//!   call through; owns state-transition rules, delegates persistence.
//! - [`executor::Executor`] — the pluggable strategy that runs a job's
//!   command; [`executor::ShellExecutor`] is the default.
//! - [`worker::Worker`] / [`pool::WorkerPool`] — the claim-execute-commit
//!   loop and its supervision (thread-backed or process-backed).
//!
//! ## What this crate is not
//!
//! Not a CLI, not an HTTP dashboard, not a config file format, not a log
//! sink. Those are external collaborators that call through the types
//! re-exported here.

pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod model;
pub mod pool;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::{QueueError, Result};
pub use executor::{ExecutionOutcome, Executor, ShellExecutor};
pub use manager::QueueManager;
pub use model::{
    zero_filled_counts, Job, JobPatch, JobState, MetricEvent, MetricEventType, MetricsSummary,
    DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
pub use pool::WorkerPool;
pub use store::{JobStore, NewJob};
pub use worker::{Worker, WorkerHealth, WorkerHealthStatus};

pub use async_trait::async_trait;
