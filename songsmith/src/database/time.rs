//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, TimeZone, Utc};

/// Current time as Unix epoch milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds for `now - age`.
#[inline]
pub fn ms_ago(age: chrono::Duration) -> i64 {
    (Utc::now() - age).timestamp_millis()
}

/// Convert epoch milliseconds to `DateTime<Utc>`, clamping out-of-range values.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .earliest()
        .unwrap_or(if ms.is_negative() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}
