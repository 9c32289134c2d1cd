//! Coordination constants, validation, and pure scheduling math.
//!
//! This module lives in `core` (zero internal deps) so that the services,
//! the HTTP layer, and the worker all reference the same lease bounds,
//! presence TTLs, history capacities, and retry policy.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Lock lease constants
// ---------------------------------------------------------------------------

/// Default lease duration in milliseconds (30 seconds).
pub const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;

/// Minimum allowed lease duration in milliseconds.
pub const MIN_LEASE_DURATION_MS: u64 = 10;

/// Maximum allowed lease duration in milliseconds (1 hour).
pub const MAX_LEASE_DURATION_MS: u64 = 3_600_000;

/// Upper bound on acquisition retries for a single call.
pub const MAX_LOCK_RETRY_ATTEMPTS: u32 = 50;

/// Upper bound on the delay between acquisition retries.
pub const MAX_LOCK_RETRY_DELAY_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Presence constants
// ---------------------------------------------------------------------------

/// Presence entries expire this many seconds after their last refresh.
pub const PRESENCE_TTL_SECS: u64 = 120;

/// Known presence roles.
pub mod roles {
    pub const PLAYER: &str = "player";
    pub const SPECTATOR: &str = "spectator";
    pub const MODERATOR: &str = "moderator";
    pub const HOST: &str = "host";
}

/// Known presence statuses.
pub mod statuses {
    pub const ONLINE: &str = "online";
    pub const AWAY: &str = "away";
    pub const BUSY: &str = "busy";
}

// ---------------------------------------------------------------------------
// Pub/sub history constants
// ---------------------------------------------------------------------------

/// Number of events retained per game event channel (oldest evicted first).
pub const EVENT_HISTORY_CAPACITY: usize = 100;

/// Number of chat messages retained per game chat channel.
pub const CHAT_HISTORY_CAPACITY: usize = 100;

/// History lists expire this long after the last publish (24 hours).
pub const HISTORY_RETENTION_SECS: u64 = 86_400;

/// Default page size for history reads.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Queue constants
// ---------------------------------------------------------------------------

/// Default number of attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Upper bound on `max_attempts`.
pub const MAX_MAX_ATTEMPTS: u32 = 25;

/// Priorities are clamped to `-MAX_JOB_PRIORITY..=MAX_JOB_PRIORITY`.
pub const MAX_JOB_PRIORITY: i32 = 1_000_000;

/// First retry waits this long; each further retry doubles it.
pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;

/// Ceiling on a single retry delay (5 minutes).
pub const RETRY_BACKOFF_MAX_MS: u64 = 300_000;

/// Completed / failed job records are kept this long for introspection.
pub const JOB_RETENTION_SECS: u64 = 86_400;

/// Enqueue sequences wrap below this bound when composing scores.
const SEQUENCE_SPACE: f64 = 4_294_967_296.0; // 2^32

/// Session lifecycle names shared by the API and the worker.
pub mod session {
    /// Published on the game channel when a session starts.
    pub const STARTED_EVENT: &str = "session.started";
    /// Published once background setup has finished.
    pub const READY_EVENT: &str = "session.ready";
    /// Job type of the background setup step.
    pub const SETUP_JOB: &str = "session.setup";
    pub const DEFAULT_SETUP_QUEUE: &str = "session-setup";
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

/// Maximum length of a lock, board, game, queue, or participant id.
pub const MAX_ID_LEN: usize = 128;

/// Validate an identifier used inside a store key.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_ID_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, dot, or colon characters.
pub fn validate_id(kind: &str, id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(format!("{kind} must not be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(CoreError::Validation(format!(
            "{kind} may only contain alphanumeric, hyphen, underscore, dot, or colon characters"
        )));
    }
    Ok(())
}

/// Validate a lease duration in milliseconds.
pub fn validate_lease_duration(ms: u64) -> Result<(), CoreError> {
    if ms < MIN_LEASE_DURATION_MS {
        return Err(CoreError::Validation(format!(
            "Lease duration must be at least {MIN_LEASE_DURATION_MS}ms, got {ms}"
        )));
    }
    if ms > MAX_LEASE_DURATION_MS {
        return Err(CoreError::Validation(format!(
            "Lease duration must be at most {MAX_LEASE_DURATION_MS}ms, got {ms}"
        )));
    }
    Ok(())
}

/// Validate the retry budget of a single lock acquisition.
pub fn validate_lock_retry(attempts: u32, delay_ms: u64) -> Result<(), CoreError> {
    if attempts > MAX_LOCK_RETRY_ATTEMPTS {
        return Err(CoreError::Validation(format!(
            "retry_attempts must be at most {MAX_LOCK_RETRY_ATTEMPTS}, got {attempts}"
        )));
    }
    if delay_ms > MAX_LOCK_RETRY_DELAY_MS {
        return Err(CoreError::Validation(format!(
            "retry_delay_ms must be at most {MAX_LOCK_RETRY_DELAY_MS}, got {delay_ms}"
        )));
    }
    Ok(())
}

/// Validate a job's `max_attempts`.
pub fn validate_max_attempts(max_attempts: u32) -> Result<(), CoreError> {
    if max_attempts == 0 || max_attempts > MAX_MAX_ATTEMPTS {
        return Err(CoreError::Validation(format!(
            "max_attempts must be between 1 and {MAX_MAX_ATTEMPTS}, got {max_attempts}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduling math
// ---------------------------------------------------------------------------

/// Delay before the next attempt of a job that has failed `attempts` times:
/// `base_ms * 2^(attempts - 1)`, capped at `max_ms`.
pub fn exponential_backoff_ms(base_ms: u64, max_ms: u64, attempts: u32) -> u64 {
    let exponent = attempts.saturating_sub(1).min(31);
    base_ms.saturating_mul(1u64 << exponent).min(max_ms)
}

/// Clamp a requested priority into the supported range.
pub fn clamp_priority(priority: i32) -> i32 {
    priority.clamp(-MAX_JOB_PRIORITY, MAX_JOB_PRIORITY)
}

/// Sorted-set score for a ready job.
///
/// Lower scores pop first, so the priority is negated; the enqueue sequence
/// breaks ties in FIFO order. Both terms stay below 2^53 so the score is
/// exact in an `f64`.
pub fn waiting_score(priority: i32, sequence: u64) -> f64 {
    let priority = f64::from(clamp_priority(priority));
    let sequence = (sequence as f64) % SEQUENCE_SPACE;
    -priority * SEQUENCE_SPACE + sequence
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- validate_id ----------------------------------------------------------

    #[test]
    fn valid_ids() {
        assert!(validate_id("lock_id", "game-42").is_ok());
        assert!(validate_id("lock_id", "session:init:game_1.v2").is_ok());
    }

    #[test]
    fn empty_id_rejected() {
        assert!(validate_id("board_id", "").is_err());
    }

    #[test]
    fn id_with_spaces_rejected() {
        assert!(validate_id("board_id", "my board").is_err());
    }

    #[test]
    fn id_too_long_rejected() {
        let id = "a".repeat(MAX_ID_LEN + 1);
        assert!(validate_id("board_id", &id).is_err());
    }

    // -- validate_lease_duration ----------------------------------------------

    #[test]
    fn lease_duration_bounds() {
        assert!(validate_lease_duration(MIN_LEASE_DURATION_MS).is_ok());
        assert!(validate_lease_duration(DEFAULT_LEASE_DURATION_MS).is_ok());
        assert!(validate_lease_duration(MAX_LEASE_DURATION_MS).is_ok());
        assert!(validate_lease_duration(0).is_err());
        assert!(validate_lease_duration(MAX_LEASE_DURATION_MS + 1).is_err());
    }

    #[test]
    fn lock_retry_bounds() {
        assert!(validate_lock_retry(0, 0).is_ok());
        assert!(validate_lock_retry(MAX_LOCK_RETRY_ATTEMPTS, MAX_LOCK_RETRY_DELAY_MS).is_ok());
        assert!(validate_lock_retry(MAX_LOCK_RETRY_ATTEMPTS + 1, 0).is_err());
        assert!(validate_lock_retry(1, MAX_LOCK_RETRY_DELAY_MS + 1).is_err());
    }

    #[test]
    fn max_attempts_bounds() {
        assert!(validate_max_attempts(1).is_ok());
        assert!(validate_max_attempts(DEFAULT_MAX_ATTEMPTS).is_ok());
        assert!(validate_max_attempts(0).is_err());
        assert!(validate_max_attempts(MAX_MAX_ATTEMPTS + 1).is_err());
    }

    // -- exponential_backoff_ms ------------------------------------------------

    fn backoff(attempts: u32) -> u64 {
        exponential_backoff_ms(RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS, attempts)
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff(1), 1_000);
        assert_eq!(backoff(2), 2_000);
        assert_eq!(backoff(3), 4_000);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(30), RETRY_BACKOFF_MAX_MS);
        assert_eq!(backoff(u32::MAX), RETRY_BACKOFF_MAX_MS);
    }

    #[test]
    fn backoff_for_zero_attempts_is_base() {
        assert_eq!(backoff(0), RETRY_BACKOFF_BASE_MS);
    }

    // -- waiting_score --------------------------------------------------------

    #[test]
    fn higher_priority_scores_lower() {
        assert!(waiting_score(8, 10) < waiting_score(5, 1));
        assert!(waiting_score(5, 1) < waiting_score(2, 0));
    }

    #[test]
    fn equal_priority_orders_by_sequence() {
        assert!(waiting_score(3, 1) < waiting_score(3, 2));
    }

    #[test]
    fn extreme_priorities_remain_exact() {
        let top = waiting_score(MAX_JOB_PRIORITY, 1);
        let next = waiting_score(MAX_JOB_PRIORITY, 2);
        assert!(top < next);
        assert_eq!(clamp_priority(i32::MAX), MAX_JOB_PRIORITY);
    }
}
