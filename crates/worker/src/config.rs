use tabletop_core::coordination::session::DEFAULT_SETUP_QUEUE;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues polled by this worker, in priority order.
    pub queues: Vec<String>,
    /// Delay between polls when every queue is empty.
    pub poll_interval_ms: u64,
    /// Most jobs claimed from one queue per poll.
    pub batch_size: usize,
    /// An active job older than this is considered stalled.
    pub stalled_timeout_secs: u64,
    /// How often stalled jobs are recovered.
    pub recovery_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_SETUP_QUEUE.to_string()],
            poll_interval_ms: 500,
            batch_size: 16,
            stalled_timeout_secs: 300,
            recovery_interval_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default         |
    /// |----------------------------------|-----------------|
    /// | `WORKER_QUEUES`                  | `session-setup` |
    /// | `WORKER_POLL_INTERVAL_MS`        | `500`           |
    /// | `WORKER_BATCH_SIZE`              | `16`            |
    /// | `WORKER_STALLED_TIMEOUT_SECS`    | `300`           |
    /// | `WORKER_RECOVERY_INTERVAL_SECS`  | `30`            |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let queues: Vec<String> = std::env::var("WORKER_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.queues);

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| defaults.poll_interval_ms.to_string())
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let batch_size: usize = std::env::var("WORKER_BATCH_SIZE")
            .unwrap_or_else(|_| defaults.batch_size.to_string())
            .parse()
            .expect("WORKER_BATCH_SIZE must be a valid usize");

        let stalled_timeout_secs: u64 = std::env::var("WORKER_STALLED_TIMEOUT_SECS")
            .unwrap_or_else(|_| defaults.stalled_timeout_secs.to_string())
            .parse()
            .expect("WORKER_STALLED_TIMEOUT_SECS must be a valid u64");

        let recovery_interval_secs: u64 = std::env::var("WORKER_RECOVERY_INTERVAL_SECS")
            .unwrap_or_else(|_| defaults.recovery_interval_secs.to_string())
            .parse()
            .expect("WORKER_RECOVERY_INTERVAL_SECS must be a valid u64");

        Self {
            queues,
            poll_interval_ms,
            batch_size: batch_size.max(1),
            stalled_timeout_secs,
            recovery_interval_secs,
        }
    }
}
