//! Shared timestamp helpers for record envelopes and lock markers.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as RFC 3339 with millisecond precision (e.g. `2026-01-01T00:00:00.000Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds since the unix epoch. Clock skew before 1970 collapses to zero.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse an RFC 3339 timestamp, normalizing it to UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn is_valid_timestamp(value: &str) -> bool {
    parse_timestamp(value).is_some()
}

/// Cheap jitter for retry loops; not suitable for anything security related.
pub fn jitter_ms(max_exclusive: u64) -> u64 {
    if max_exclusive <= 1 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    (nanos ^ u64::from(std::process::id())) % max_exclusive
}
