//! Queue operations.
//!
//! Store layout per queue `q` (see [`KeySpace`]):
//!
//! | key                     | kind       | member | score                         |
//! |-------------------------|------------|--------|-------------------------------|
//! | `queue:q:waiting`       | sorted set | job id | `-priority * 2^32 + sequence` |
//! | `queue:q:delayed`       | sorted set | job id | `ready_at` (epoch ms)         |
//! | `queue:q:active`        | sorted set | job id | `started_at` (epoch ms)       |
//! | `queue:q:completed`     | sorted set | job id | `finished_at` (epoch ms)      |
//! | `queue:q:failed`        | sorted set | job id | `finished_at` (epoch ms)      |
//! | `queue:q:seq`           | counter    |        |                               |
//! | `job:{id}`              | JSON       |        |                               |
//!
//! The sequence is drawn once per job at enqueue and stored on the record,
//! so a job keeps its FIFO position when it comes back from a delay or a
//! retry.
//!
//! Every transition between sets is one atomic store call, and that call is
//! the ownership point: popping `waiting` into `active` hands a job to
//! exactly one consumer, moving a member out of `delayed` decides who
//! promotes it, and moving it out of `active` decides who records its
//! outcome. A job is therefore always in exactly one set, whatever fails
//! between the set move and the record update that follows it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{
    clamp_priority, validate_id, validate_max_attempts, JOB_RETENTION_SECS,
};
use tabletop_core::error::CoreError;
use tabletop_core::keys::KeySpace;
use tabletop_core::types::{new_id, now_ms, timestamp_from_ms};
use tabletop_store::{KeyValueStore, StoreResult};

use crate::error::QueueResult;
use crate::job::{Job, JobOptions, JobStatus, RetryPolicy};

/// Most delayed jobs promoted per claim.
const PROMOTE_BATCH: usize = 100;

/// Most stalled jobs recovered per sweep.
const RECOVER_BATCH: usize = 100;

/// Counts per job state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ready to be claimed.
    pub waiting: u64,
    /// Pending but not yet ready (initial delay or retry backoff).
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub completed: bool,
}

/// Result of [`QueueService::fail_job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// The failure was recorded. `false` if the job was not active.
    pub failed: bool,
    /// The job went back to `pending` and will run again.
    pub will_retry: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<tabletop_core::types::Timestamp>,
}

impl JobFailure {
    fn not_active() -> Self {
        Self {
            failed: false,
            will_retry: false,
            attempts: 0,
            next_attempt_at: None,
        }
    }
}

#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    retry: RetryPolicy,
    retention: Duration,
}

impl QueueService {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(JOB_RETENTION_SECS),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How long completed and failed job records stay inspectable.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    // -- producers ------------------------------------------------------------

    /// Enqueue a job. Returns its id.
    pub async fn add_job(
        &self,
        queue_name: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<String> {
        validate_id("queue_name", queue_name)?;
        if job_type.trim().is_empty() {
            return Err(CoreError::Validation("job_type must not be empty".into()).into());
        }
        validate_max_attempts(options.max_attempts)?;

        let sequence = self
            .store
            .increment(&self.keys.queue_sequence(queue_name), 1)
            .await?;
        let now = now_ms();
        let ready_ms = now + options.delay_ms as i64;
        let job = Job {
            id: new_id(),
            queue_name: queue_name.to_string(),
            job_type: job_type.to_string(),
            payload,
            priority: clamp_priority(options.priority),
            sequence: sequence as u64,
            created_at: timestamp_from_ms(now),
            ready_at: timestamp_from_ms(ready_ms),
            attempts: 0,
            max_attempts: options.max_attempts,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            last_error: None,
        };

        self.save(&job, None).await?;
        if options.delay_ms > 0 {
            self.store
                .sorted_add(&self.keys.queue_delayed(queue_name), &job.id, ready_ms as f64)
                .await?;
        } else {
            self.store
                .sorted_add(&self.keys.queue_waiting(queue_name), &job.id, job.waiting_score())
                .await?;
        }

        tracing::debug!(
            queue = queue_name,
            job_id = %job.id,
            job_type,
            priority = job.priority,
            delay_ms = options.delay_ms,
            "Job enqueued"
        );
        Ok(job.id)
    }

    // -- consumers ------------------------------------------------------------

    /// Claim the ready job with the highest priority (FIFO within a
    /// priority) and mark it `active`.
    ///
    /// Returns `None` when nothing is ready. Concurrent callers never
    /// receive the same job.
    pub async fn get_next_job(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        validate_id("queue_name", queue_name)?;
        self.promote_due(queue_name).await?;

        let waiting = self.keys.queue_waiting(queue_name);
        let active = self.keys.queue_active(queue_name);
        loop {
            let now = now_ms();
            let Some((job_id, _)) = self
                .store
                .sorted_pop_min_into(&waiting, &active, now as f64)
                .await?
            else {
                return Ok(None);
            };
            // The job is now in `active`; if anything below fails,
            // `recover_stalled` puts it back.
            let Some(mut job) = self.load(&job_id).await? else {
                tracing::warn!(queue = queue_name, job_id = %job_id, "Dropping queue entry without a job record");
                self.store.sorted_remove(&active, &job_id).await?;
                continue;
            };

            job.status = JobStatus::Active;
            job.started_at = Some(timestamp_from_ms(now));
            self.save(&job, None).await?;

            tracing::debug!(
                queue = queue_name,
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts + 1,
                "Job claimed"
            );
            return Ok(Some(job));
        }
    }

    /// Mark an active job `completed` and keep `result` for introspection.
    ///
    /// Returns `completed: false` if the job is unknown or not active.
    pub async fn complete_job(
        &self,
        job_id: &str,
        result: Option<serde_json::Value>,
    ) -> QueueResult<JobCompletion> {
        let Some(mut job) = self.load(job_id).await? else {
            return Ok(JobCompletion { completed: false });
        };
        let now = now_ms();
        let completed = self.keys.queue_completed(&job.queue_name);
        if !self.settle_active(&job, &completed, now as f64).await? {
            return Ok(JobCompletion { completed: false });
        }

        job.status = JobStatus::Completed;
        job.finished_at = Some(timestamp_from_ms(now));
        job.result = result;
        self.save(&job, Some(self.retention)).await?;

        tracing::info!(queue = %job.queue_name, job_id, job_type = %job.job_type, "Job completed");
        Ok(JobCompletion { completed: true })
    }

    /// Record a failed attempt of an active job.
    ///
    /// While attempts remain the job returns to `pending` after the retry
    /// backoff; otherwise it becomes terminally `failed`.
    pub async fn fail_job(&self, job_id: &str, reason: &str) -> QueueResult<JobFailure> {
        let Some(mut job) = self.load(job_id).await? else {
            return Ok(JobFailure::not_active());
        };

        let now = now_ms();
        let exhausted = job.is_last_attempt();
        let attempts = job.attempts + 1;
        let ready_ms = now + self.retry.backoff(attempts).as_millis() as i64;
        let (destination, score) = if exhausted {
            (self.keys.queue_failed(&job.queue_name), now as f64)
        } else {
            (self.keys.queue_delayed(&job.queue_name), ready_ms as f64)
        };
        if !self.settle_active(&job, &destination, score).await? {
            return Ok(JobFailure::not_active());
        }

        job.attempts = attempts;
        job.last_error = Some(reason.to_string());
        job.started_at = None;

        if !exhausted {
            job.status = JobStatus::Pending;
            job.ready_at = timestamp_from_ms(ready_ms);
            self.save(&job, None).await?;

            tracing::warn!(
                queue = %job.queue_name,
                job_id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                reason,
                "Job failed, retry scheduled"
            );
            return Ok(JobFailure {
                failed: true,
                will_retry: true,
                attempts: job.attempts,
                next_attempt_at: Some(job.ready_at),
            });
        }

        job.status = JobStatus::Failed;
        job.finished_at = Some(timestamp_from_ms(now));
        self.save(&job, Some(self.retention)).await?;

        tracing::error!(
            queue = %job.queue_name,
            job_id,
            attempts = job.attempts,
            reason,
            "Job failed permanently"
        );
        Ok(JobFailure {
            failed: true,
            will_retry: false,
            attempts: job.attempts,
            next_attempt_at: None,
        })
    }

    /// Fail every job that has been active for longer than `timeout`.
    ///
    /// Covers consumers that crashed mid-job. Each recovery counts as a
    /// failed attempt. Returns the ids of recovered jobs.
    pub async fn recover_stalled(&self, queue_name: &str, timeout: Duration) -> QueueResult<Vec<String>> {
        validate_id("queue_name", queue_name)?;
        let cutoff = now_ms() - timeout.as_millis() as i64;
        let stalled = self
            .store
            .sorted_range_by_score(
                &self.keys.queue_active(queue_name),
                f64::NEG_INFINITY,
                cutoff as f64,
                RECOVER_BATCH,
            )
            .await?;

        let mut recovered = Vec::new();
        for (job_id, _) in stalled {
            let reason = format!("stalled: no outcome within {}s", timeout.as_secs());
            if self.fail_job(&job_id, &reason).await?.failed {
                recovered.push(job_id);
            } else {
                // Already settled by its consumer, or the record is gone.
                self.store
                    .sorted_remove(&self.keys.queue_active(queue_name), &job_id)
                    .await?;
            }
        }
        if !recovered.is_empty() {
            tracing::warn!(queue = queue_name, count = recovered.len(), "Recovered stalled jobs");
        }
        Ok(recovered)
    }

    // -- introspection --------------------------------------------------------

    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        validate_id("job_id", job_id)?;
        Ok(self.load(job_id).await?)
    }

    pub async fn get_queue_stats(&self, queue_name: &str) -> QueueResult<QueueStats> {
        validate_id("queue_name", queue_name)?;
        let horizon = (now_ms() - self.retention.as_millis() as i64) as f64;
        let completed = self.keys.queue_completed(queue_name);
        let failed = self.keys.queue_failed(queue_name);
        self.store
            .sorted_remove_by_score(&completed, f64::NEG_INFINITY, horizon)
            .await?;
        self.store
            .sorted_remove_by_score(&failed, f64::NEG_INFINITY, horizon)
            .await?;

        Ok(QueueStats {
            waiting: self.store.sorted_count(&self.keys.queue_waiting(queue_name)).await?,
            delayed: self.store.sorted_count(&self.keys.queue_delayed(queue_name)).await?,
            active: self.store.sorted_count(&self.keys.queue_active(queue_name)).await?,
            completed: self.store.sorted_count(&completed).await?,
            failed: self.store.sorted_count(&failed).await?,
        })
    }

    // -- internals ------------------------------------------------------------

    /// Move delayed jobs whose `ready_at` has passed into `waiting`.
    async fn promote_due(&self, queue_name: &str) -> StoreResult<()> {
        let delayed = self.keys.queue_delayed(queue_name);
        let waiting = self.keys.queue_waiting(queue_name);
        let due = self
            .store
            .sorted_range_by_score(&delayed, f64::NEG_INFINITY, now_ms() as f64, PROMOTE_BATCH)
            .await?;

        for (job_id, _) in due {
            match self.load(&job_id).await? {
                // A `false` move means another consumer promoted it first.
                Some(job) => {
                    self.store
                        .sorted_move(&delayed, &waiting, &job_id, job.waiting_score())
                        .await?;
                }
                None => {
                    tracing::warn!(queue = queue_name, job_id = %job_id, "Delayed entry without a job record");
                    self.store.sorted_remove(&delayed, &job_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Claim the right to record an outcome for `job` by moving it out of
    /// `active` into `destination`.
    async fn settle_active(&self, job: &Job, destination: &str, score: f64) -> StoreResult<bool> {
        self.store
            .sorted_move(&self.keys.queue_active(&job.queue_name), destination, &job.id, score)
            .await
    }

    async fn load(&self, job_id: &str) -> StoreResult<Option<Job>> {
        match self.store.get(&self.keys.job(job_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &Job, ttl: Option<Duration>) -> StoreResult<()> {
        self.store
            .set(&self.keys.job(&job.id), &serde_json::to_string(job)?, ttl)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tabletop_store::testing::FaultyStore;
    use tabletop_store::MemoryStore;

    fn service() -> QueueService {
        QueueService::new(Arc::new(MemoryStore::new()), KeySpace::new("test"))
            .with_retry_policy(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn higher_priority_is_claimed_first() {
        let queue = service();
        for priority in [2, 8, 5] {
            queue
                .add_job("setup", "noop", json!({ "p": priority }), JobOptions::priority(priority))
                .await
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = queue.get_next_job("setup").await.unwrap() {
            order.push(job.priority);
        }
        assert_eq!(order, vec![8, 5, 2]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = service();
        let first = queue.add_job("q", "a", json!(null), JobOptions::default()).await.unwrap();
        let second = queue.add_job("q", "b", json!(null), JobOptions::default()).await.unwrap();

        assert_eq!(queue.get_next_job("q").await.unwrap().unwrap().id, first);
        assert_eq!(queue.get_next_job("q").await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn claimed_job_is_active() {
        let queue = service();
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();
        let job = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.started_at.is_some());

        let stats = queue.get_queue_stats("q").await.unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(queue.get_job(&id).await.unwrap().unwrap().status, JobStatus::Active);
    }

    #[tokio::test]
    async fn complete_stores_result() {
        let queue = service();
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();
        queue.get_next_job("q").await.unwrap();

        let completion = queue.complete_job(&id, Some(json!({ "ok": true }))).await.unwrap();
        assert!(completion.completed);
        // Second completion is refused.
        assert!(!queue.complete_job(&id, None).await.unwrap().completed);

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({ "ok": true })));
        assert_eq!(queue.get_queue_stats("q").await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn completing_a_pending_job_is_refused() {
        let queue = service();
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();
        assert!(!queue.complete_job(&id, None).await.unwrap().completed);
        assert!(!queue.complete_job("missing", None).await.unwrap().completed);
    }

    #[tokio::test]
    async fn failure_retries_then_dead_letters() {
        let queue = service();
        let id = queue
            .add_job("q", "flaky", json!({}), JobOptions::default().max_attempts(2))
            .await
            .unwrap();

        queue.get_next_job("q").await.unwrap().unwrap();
        let first = queue.fail_job(&id, "timeout").await.unwrap();
        assert!(first.failed);
        assert!(first.will_retry);
        assert_eq!(first.attempts, 1);

        let retried = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempts, 1);

        let second = queue.fail_job(&id, "timeout again").await.unwrap();
        assert!(second.failed);
        assert!(!second.will_retry);

        assert!(queue.get_next_job("q").await.unwrap().is_none());
        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("timeout again"));

        let stats = queue.get_queue_stats("q").await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting + stats.delayed + stats.active, 0);
    }

    #[tokio::test]
    async fn backoff_delays_the_retry() {
        let queue = QueueService::new(Arc::new(MemoryStore::new()), KeySpace::new("test"));
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();
        queue.get_next_job("q").await.unwrap();

        let failure = queue.fail_job(&id, "nope").await.unwrap();
        assert!(failure.will_retry);
        assert!(failure.next_attempt_at.is_some());
        assert!(queue.get_next_job("q").await.unwrap().is_none());
        assert_eq!(queue.get_queue_stats("q").await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn delayed_job_becomes_visible_after_delay() {
        let queue = service();
        queue
            .add_job("q", "later", json!({}), JobOptions::default().delayed(Duration::from_millis(80)))
            .await
            .unwrap();

        assert!(queue.get_next_job("q").await.unwrap().is_none());
        assert_eq!(queue.get_queue_stats("q").await.unwrap().delayed, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let job = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(job.job_type, "later");
    }

    #[tokio::test]
    async fn delayed_job_keeps_its_place_among_equal_priorities() {
        let queue = service();
        let early = queue
            .add_job("q", "a", json!(null), JobOptions::default().delayed(Duration::from_millis(30)))
            .await
            .unwrap();
        queue.add_job("q", "b", json!(null), JobOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let first = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(first.id, early);
        assert_eq!(queue.get_next_job("q").await.unwrap().unwrap().job_type, "b");
    }

    #[tokio::test]
    async fn retried_job_keeps_its_place_among_equal_priorities() {
        let queue = service();
        let early = queue.add_job("q", "a", json!(null), JobOptions::default()).await.unwrap();
        queue.get_next_job("q").await.unwrap().unwrap();
        queue.add_job("q", "b", json!(null), JobOptions::default()).await.unwrap();

        assert!(queue.fail_job(&early, "boom").await.unwrap().will_retry);

        let next = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(next.id, early);
        assert_eq!(next.attempts, 1);
    }

    #[tokio::test]
    async fn higher_priority_still_wins_over_older_jobs() {
        let queue = service();
        queue.add_job("q", "old", json!(null), JobOptions::priority(1)).await.unwrap();
        queue.add_job("q", "urgent", json!(null), JobOptions::priority(9)).await.unwrap();

        assert_eq!(queue.get_next_job("q").await.unwrap().unwrap().job_type, "urgent");
    }

    #[tokio::test]
    async fn stalled_jobs_are_recovered() {
        let queue = service();
        let id = queue.add_job("q", "slow", json!({}), JobOptions::default()).await.unwrap();
        queue.get_next_job("q").await.unwrap();

        assert!(queue.recover_stalled("q", Duration::from_secs(60)).await.unwrap().is_empty());
        let recovered = queue.recover_stalled("q", Duration::ZERO).await.unwrap();
        assert_eq!(recovered, vec![id.clone()]);

        let job = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn claim_interrupted_after_the_move_is_recoverable() {
        let store = FaultyStore::new();
        let queue = QueueService::new(store.clone(), KeySpace::new("test"))
            .with_retry_policy(RetryPolicy::immediate());
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();

        // The record update after the claim fails.
        store.fail("set", ":job:", 1);
        assert_matches!(queue.get_next_job("q").await, Err(QueueError::Store(_)));

        let stats = queue.get_queue_stats("q").await.unwrap();
        assert_eq!((stats.waiting, stats.active), (0, 1));

        assert_eq!(queue.recover_stalled("q", Duration::ZERO).await.unwrap(), vec![id.clone()]);
        let job = queue.get_next_job("q").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn failed_claim_leaves_the_job_waiting() {
        let store = FaultyStore::new();
        let queue = QueueService::new(store.clone(), KeySpace::new("test"));
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();

        store.fail("sorted_pop_min_into", ":waiting", 1);
        assert_matches!(queue.get_next_job("q").await, Err(QueueError::Store(_)));

        assert_eq!(queue.get_next_job("q").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn settled_job_is_never_in_two_sets() {
        let store = FaultyStore::new();
        let queue = QueueService::new(store.clone(), KeySpace::new("test"));
        let id = queue.add_job("q", "a", json!({}), JobOptions::default()).await.unwrap();
        queue.get_next_job("q").await.unwrap().unwrap();

        // Completion moves the job out of `active` even if the record
        // update afterwards fails.
        store.fail("set", ":job:", 1);
        assert!(queue.complete_job(&id, None).await.is_err());

        let stats = queue.get_queue_stats("q").await.unwrap();
        assert_eq!((stats.active, stats.completed), (0, 1));
        assert!(!queue.complete_job(&id, None).await.unwrap().completed);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let queue = service();
        assert_matches!(
            queue.add_job("bad queue", "a", json!({}), JobOptions::default()).await,
            Err(QueueError::Invalid(_))
        );
        assert_matches!(
            queue.add_job("q", " ", json!({}), JobOptions::default()).await,
            Err(QueueError::Invalid(_))
        );
        assert_matches!(
            queue.add_job("q", "a", json!({}), JobOptions::default().max_attempts(0)).await,
            Err(QueueError::Invalid(_))
        );
    }
}
