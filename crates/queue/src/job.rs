//! Job record and state machine.
//!
//! ```text
//! pending ──claim──▶ active ──complete──▶ completed
//!    ▲                  │
//!    └──fail (retry)────┤
//!                       └──fail (exhausted)──▶ failed
//! ```
//!
//! `completed` and `failed` are terminal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{
    exponential_backoff_ms, waiting_score, DEFAULT_MAX_ATTEMPTS, RETRY_BACKOFF_BASE_MS,
    RETRY_BACKOFF_MAX_MS,
};
use tabletop_core::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue_name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher runs sooner.
    pub priority: i32,
    /// Enqueue order within the queue, fixed at creation. Breaks priority
    /// ties every time the job becomes ready.
    #[serde(default)]
    pub sequence: u64,
    pub created_at: Timestamp,
    /// Earliest time the job may be claimed.
    pub ready_at: Timestamp,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Whether a failure now would exhaust the retry budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }

    /// Score of this job in its queue's `waiting` set.
    pub fn waiting_score(&self) -> f64 {
        waiting_score(self.priority, self.sequence)
    }
}

/// Enqueue parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: i32,
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_ms: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl JobOptions {
    pub fn priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Exponential backoff between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: RETRY_BACKOFF_BASE_MS,
            max_ms: RETRY_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately; for tests and latency-insensitive queues.
    pub fn immediate() -> Self {
        Self {
            base_ms: 0,
            max_ms: 0,
        }
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        Duration::from_millis(exponential_backoff_ms(self.base_ms, self.max_ms, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn last_attempt_is_the_one_that_exhausts_the_budget() {
        let mut job: Job = serde_json::from_value(serde_json::json!({
            "id": "j1",
            "queue_name": "q",
            "job_type": "t",
            "payload": null,
            "priority": 0,
            "created_at": "2026-01-01T00:00:00Z",
            "ready_at": "2026-01-01T00:00:00Z",
            "attempts": 0,
            "max_attempts": 2,
            "status": "pending"
        }))
        .unwrap();
        assert_eq!(job.sequence, 0);
        assert!(!job.is_last_attempt());
        job.attempts = 1;
        assert!(job.is_last_attempt());
    }

    #[test]
    fn default_policy_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::immediate().backoff(5), Duration::ZERO);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: JobOptions = serde_json::from_str(r#"{"priority": 4}"#).unwrap();
        assert_eq!(options.priority, 4);
        assert_eq!(options.delay_ms, 0);
        assert_eq!(options.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }
}
