//! Error taxonomy for the queue engine.
//!
//! Kinds map 1:1 to the failure modes a client or worker can actually observe:
//! unknown job, illegal state transition, out-of-range input, a storage
//! failure that escaped the store's own retry budget, or a bad config value.
//! `JobExecutionError` never leaves the engine as an error return -- it is
//! captured as a string and folded into the retry/DLQ state machine instead.

use thiserror::Error;

/// Errors raised by the queue engine's public surface.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job '{id}' not found")]
    JobNotFound { id: String },

    #[error("job '{id}' already exists")]
    DuplicateJob { id: String },

    #[error("job '{id}' is in state '{actual}', expected '{expected}'")]
    InvalidJobState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("priority must be between 1 and 10, got {value}")]
    InvalidPriority { value: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("invalid configuration key '{key}': {reason}")]
    Configuration { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;
