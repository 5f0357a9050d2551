//! The configuration record the engine is driven by.
//!
//! Reading this from a dotfile, overlaying environment variables, and
//! exposing a `config get`/`config set` surface is the job of the
//! out-of-scope CLI collaborator. The core only owns the record's shape,
//! its defaults, and validation of values once they arrive.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_db_path() -> PathBuf {
    dirs_home().join(".queuectl").join("queue.db")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Engine configuration: retry/backoff policy, storage location, and the
/// tunables a worker loop reads on every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_retries: i64,
    pub backoff_base: f64,
    pub db_path: PathBuf,
    pub worker_poll_interval_secs: f64,
    pub job_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 3,
            backoff_base: 2.0,
            db_path: default_db_path(),
            worker_poll_interval_secs: 1.0,
            job_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Set a single field by its external (hyphenated) key name, validating
    /// the value's type as it goes. Returns `ConfigurationError`-shaped
    /// errors for unknown keys or malformed values; the out-of-scope CLI
    /// collaborator is expected to call this from its own `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), QueueError> {
        match key {
            "max_retries" => {
                self.max_retries = value.parse().map_err(|_| QueueError::Configuration {
                    key: key.to_string(),
                    reason: format!("'{value}' is not an integer"),
                })?;
            }
            "backoff_base" => {
                self.backoff_base = value.parse().map_err(|_| QueueError::Configuration {
                    key: key.to_string(),
                    reason: format!("'{value}' is not a float"),
                })?;
            }
            "db_path" => {
                self.db_path = PathBuf::from(value);
            }
            "worker_poll_interval" | "worker_poll_interval_secs" => {
                self.worker_poll_interval_secs =
                    value.parse().map_err(|_| QueueError::Configuration {
                        key: key.to_string(),
                        reason: format!("'{value}' is not a float"),
                    })?;
            }
            "job_timeout" | "job_timeout_secs" => {
                self.job_timeout_secs = value.parse().map_err(|_| QueueError::Configuration {
                    key: key.to_string(),
                    reason: format!("'{value}' is not an integer"),
                })?;
            }
            other => {
                return Err(QueueError::Configuration {
                    key: other.to_string(),
                    reason: "unknown configuration key".to_string(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, 2.0);
        assert_eq!(cfg.worker_poll_interval_secs, 1.0);
        assert_eq!(cfg.job_timeout_secs, 300);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        let err = cfg.set("bogus", "1").unwrap_err();
        assert!(matches!(err, QueueError::Configuration { .. }));
    }

    #[test]
    fn set_rejects_malformed_value() {
        let mut cfg = Config::default();
        let err = cfg.set("max_retries", "not-a-number").unwrap_err();
        assert!(matches!(err, QueueError::Configuration { .. }));
    }

    #[test]
    fn set_updates_value_on_success() {
        let mut cfg = Config::default();
        cfg.set("max_retries", "7").unwrap();
        assert_eq!(cfg.max_retries, 7);
    }
}
