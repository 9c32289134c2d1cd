/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Caller / participant identity as supplied by the request boundary.
pub type UserId = String;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds back into a [`Timestamp`].
///
/// Out-of-range values clamp to the Unix epoch.
pub fn timestamp_from_ms(ms: i64) -> Timestamp {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Generate a new random identifier for events, messages, and jobs.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
