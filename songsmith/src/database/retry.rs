//! Retry helpers for storage and generation-step operations.
//!
//! This is the only place retry policy lives. Callers wrap a fallible
//! operation in [`with_retry`]; transient failures are retried with capped
//! exponential backoff and jitter, everything else is returned immediately.

use rand::random;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::generation::error::classify_provider;
use crate::{Error, Result};

/// Message fragments that mark a storage failure as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "deadlock",
    "too many clients",
    "pool",
    "reset",
    "refused",
    "socket",
    "serialization failure",
    "database is locked",
    "database is busy",
];

/// Message fragments that are never retried, even if a transient marker also matches.
const PERMANENT_MARKERS: &[&str] = &["constraint", "syntax error", "no such table", "no such column"];

/// Backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay in milliseconds, doubled per retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter added to each delay is drawn from `0..=max_jitter_ms`.
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            max_jitter_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based) with an explicit jitter.
    pub fn delay_for(&self, retry: u32, jitter_ms: u64) -> Duration {
        let exp_ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        Duration::from_millis(exp_ms.saturating_add(jitter_ms).min(self.max_delay_ms))
    }

    fn jittered_delay(&self, retry: u32) -> Duration {
        let jitter_ms = random::<u64>() % (self.max_jitter_ms + 1);
        self.delay_for(retry, jitter_ms)
    }
}

fn message_is_transient(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return false;
    }
    TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
}

/// Whether a driver error is worth retrying.
pub fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::PoolClosed
        | sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => false,
        sqlx::Error::Database(db_err) => {
            if !matches!(db_err.kind(), sqlx::error::ErrorKind::Other) {
                // unique / foreign key / not null / check violations
                return false;
            }
            // SQLITE_BUSY / SQLITE_LOCKED
            if matches!(db_err.code().as_deref(), Some("5") | Some("6")) {
                return true;
            }
            message_is_transient(db_err.message())
        }
        other => message_is_transient(&other.to_string()),
    }
}

/// Whether an application error is worth retrying.
pub fn is_transient_error(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(inner) => is_transient_sqlx_error(inner),
        Error::Generation(inner) => inner.retryable,
        Error::Provider(inner) => classify_provider(inner).retryable,
        Error::Io(inner) => matches!(
            inner.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ),
        Error::Other(msg) => message_is_transient(msg),
        _ => false,
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// When attempts are exhausted the last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient_error(&err) {
                    return Err(err);
                }
                if attempt >= max_attempts {
                    warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %err,
                        "Giving up after transient failures"
                    );
                    return Err(err);
                }

                let delay = policy.jittered_delay(attempt - 1);
                debug!(
                    op = op_name,
                    error = %err,
                    "Transient failure, retrying in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    max_attempts
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::error::{ErrorKind, GenerationError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 100);
        assert_eq!(policy.max_delay_ms, 2000);
        assert_eq!(policy.max_jitter_ms, 50);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, 0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, 10), Duration::from_millis(210));
        assert_eq!(policy.delay_for(4, 50), Duration::from_millis(1650));
        assert_eq!(policy.delay_for(5, 0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(63, 50), Duration::from_millis(2000));
    }

    #[test]
    fn test_message_markers() {
        assert!(message_is_transient("Connection reset by peer"));
        assert!(message_is_transient("database is locked"));
        assert!(message_is_transient("sorry, too many clients already"));
        assert!(message_is_transient("could not serialize access: serialization failure"));
        assert!(!message_is_transient("UNIQUE constraint failed: catalog_track.id"));
        assert!(!message_is_transient("near \"SELEC\": syntax error"));
        assert!(!message_is_transient("value out of range"));
    }

    #[test]
    fn test_typed_driver_errors() {
        assert!(is_transient_sqlx_error(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient_sqlx_error(&sqlx::Error::RowNotFound));
        assert!(!is_transient_sqlx_error(&sqlx::Error::PoolClosed));
    }

    fn transient() -> Error {
        Error::Generation(GenerationError::new(ErrorKind::StorageBusy, "connection reset"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts_with_growing_delays() {
        let attempts = Arc::new(AtomicU32::new(0));
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result: Result<u32> = with_retry(&RetryPolicy::default(), "flaky_write", || {
            let attempts = attempts.clone();
            let stamps = stamps.clone();
            async move {
                stamps.lock().push(Instant::now());
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                // fails three times, would succeed on the fourth
                if n <= 3 { Err(transient()) } else { Ok(n) }
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(100));
        assert!(first_gap <= Duration::from_millis(150));
        assert!(second_gap >= Duration::from_millis(200));
        assert!(second_gap <= Duration::from_millis(250));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let result = with_retry(&RetryPolicy::default(), "flaky_read", || {
            let attempts = attempts.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(transient()) } else { Ok("row") }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "row");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_not_retried() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t (id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (id) VALUES ('a')")
            .execute(&pool)
            .await
            .unwrap();

        let attempts = AtomicU32::new(0);
        let (attempts, pool) = (&attempts, &pool);
        let result = with_retry(&RetryPolicy::default(), "insert_dup", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            sqlx::query("INSERT INTO t (id) VALUES ('a')")
                .execute(pool)
                .await?;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::DatabaseSqlx(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
