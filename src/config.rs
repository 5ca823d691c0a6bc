//! Process-wide tunables.
//!
//! These bound every blocking interaction with the cluster fabric. They
//! are read once at startup (environment or defaults) and shared by all
//! database coordinators in the process.
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `QUORUS_QUEUE_TIMEOUT_MS` | 5000 | Bound on queue offers and lock acquisition |
//! | `QUORUS_TASK_SYNC_TIMEOUT_MS` | 5000 | Per-node base of the synchronous-response wait |
//! | `QUORUS_TASK_TOTAL_TIMEOUT_MS` | 30000 | Per-node base of a request's total lifetime |
//! | `QUORUS_PENDING_PURGE_INTERVAL_MS` | 1000 | Sweep interval for expired response managers |

use std::time::Duration;

use crate::constants::{
    DEFAULT_PENDING_PURGE_INTERVAL_MS, DEFAULT_QUEUE_TIMEOUT_MS, DEFAULT_TASK_SYNCH_TIMEOUT_MS,
    DEFAULT_TASK_TOTAL_TIMEOUT_MS,
};
use crate::error::{Error, Result};

/// Timing knobs shared by every coordinator in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Bounds every queue `offer` and cluster mutex acquisition.
    pub queue_timeout: Duration,

    /// Per-node base of a task's synchronous-response timeout.
    pub task_sync_timeout: Duration,

    /// Per-node base of a task's total timeout.
    pub task_total_timeout: Duration,

    /// How often the message service sweeps expired pending requests.
    pub pending_purge_interval: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS),
            task_sync_timeout: Duration::from_millis(DEFAULT_TASK_SYNCH_TIMEOUT_MS),
            task_total_timeout: Duration::from_millis(DEFAULT_TASK_TOTAL_TIMEOUT_MS),
            pending_purge_interval: Duration::from_millis(DEFAULT_PENDING_PURGE_INTERVAL_MS),
        }
    }
}

impl Tunables {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let tunables = Self {
            queue_timeout: env_millis("QUORUS_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS)?,
            task_sync_timeout: env_millis(
                "QUORUS_TASK_SYNC_TIMEOUT_MS",
                DEFAULT_TASK_SYNCH_TIMEOUT_MS,
            )?,
            task_total_timeout: env_millis(
                "QUORUS_TASK_TOTAL_TIMEOUT_MS",
                DEFAULT_TASK_TOTAL_TIMEOUT_MS,
            )?,
            pending_purge_interval: env_millis(
                "QUORUS_PENDING_PURGE_INTERVAL_MS",
                DEFAULT_PENDING_PURGE_INTERVAL_MS,
            )?,
        };
        tunables.validate()?;
        Ok(tunables)
    }

    /// Reject configurations that would deadlock or thrash.
    pub fn validate(&self) -> Result<()> {
        if self.queue_timeout.is_zero() {
            return Err(Error::Config(
                "queue timeout must be greater than zero".to_string(),
            ));
        }
        if self.task_total_timeout < self.task_sync_timeout {
            return Err(Error::Config(format!(
                "total timeout base ({:?}) must not be below the synchronous base ({:?})",
                self.task_total_timeout, self.task_sync_timeout
            )));
        }
        if self.pending_purge_interval.is_zero() {
            return Err(Error::Config(
                "pending purge interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_millis(var: &str, default_ms: u64) -> Result<Duration> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::Config(format!("{var} must be an integer, got '{raw}'"))),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}
