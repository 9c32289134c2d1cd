//! Queue consumer loop.
//!
//! Polls every configured queue on a fixed interval, runs each claimed job
//! through its [`JobHandler`], and settles it. A second timer recovers jobs
//! whose consumer died mid-run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tabletop_core::coordination::session::SETUP_JOB;
use tabletop_core::error::panic_message;
use tabletop_core::keys::KeySpace;
use tabletop_events::PubSubService;
use tabletop_queue::{Job, QueueResult, QueueService};
use tabletop_store::StoreHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::handler::HandlerRegistry;
use crate::session_setup::SessionSetupHandler;

/// Long-lived consumer of one or more queues.
pub struct JobRunner {
    queue: QueueService,
    handlers: HandlerRegistry,
    config: WorkerConfig,
}

impl JobRunner {
    pub fn new(queue: QueueService, handlers: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
        }
    }

    /// Runner with every built-in handler registered.
    pub fn with_default_handlers(store: &StoreHandle, keys: KeySpace, config: WorkerConfig) -> Self {
        let pubsub = PubSubService::new(store.kv.clone(), store.broker.clone(), keys.clone());
        let handlers = HandlerRegistry::new()
            .register(SETUP_JOB, Arc::new(SessionSetupHandler::new(pubsub)));
        Self::new(QueueService::new(store.kv.clone(), keys), handlers, config)
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recovery =
            tokio::time::interval(Duration::from_secs(self.config.recovery_interval_secs.max(1)));
        recovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            queues = ?self.config.queues,
            job_types = ?self.handlers.job_types().collect::<Vec<_>>(),
            poll_interval_ms = self.config.poll_interval_ms,
            "Job runner started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job runner shutting down");
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "Poll cycle failed");
                    }
                }
                _ = recovery.tick() => {
                    if let Err(e) = self.recover_stalled().await {
                        tracing::error!(error = %e, "Stalled job recovery failed");
                    }
                }
            }
        }
    }

    /// Claim and run up to `batch_size` jobs from each queue.
    ///
    /// Returns how many jobs were run.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let mut processed = 0;
        for queue_name in &self.config.queues {
            for _ in 0..self.config.batch_size {
                let Some(job) = self.queue.get_next_job(queue_name).await? else {
                    break;
                };
                self.execute(job).await?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Fail jobs that stayed active past the stalled timeout.
    ///
    /// Returns how many jobs were recovered.
    pub async fn recover_stalled(&self) -> QueueResult<usize> {
        let timeout = Duration::from_secs(self.config.stalled_timeout_secs);
        let mut recovered = 0;
        for queue_name in &self.config.queues {
            recovered += self.queue.recover_stalled(queue_name, timeout).await?.len();
        }
        Ok(recovered)
    }

    async fn execute(&self, job: Job) -> QueueResult<()> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            tracing::warn!(job_id = %job.id, job_type = %job.job_type, "No handler for job type");
            self.queue
                .fail_job(&job.id, &format!("no handler registered for '{}'", job.job_type))
                .await?;
            return Ok(());
        };

        let outcome = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;
        let settled = match outcome {
            Ok(Ok(result)) => self.queue.complete_job(&job.id, result).await?.completed,
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.id, job_type = %job.job_type, error = %format!("{e:#}"), "Job failed");
                self.queue.fail_job(&job.id, &format!("{e:#}")).await?.failed
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %job.id, job_type = %job.job_type, panic = %message, "Job handler panicked");
                self.queue
                    .fail_job(&job.id, &format!("handler panicked: {message}"))
                    .await?
                    .failed
            }
        };

        if !settled {
            // Recovered as stalled while the handler was still running.
            tracing::warn!(job_id = %job.id, "Job outcome discarded: no longer active");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
