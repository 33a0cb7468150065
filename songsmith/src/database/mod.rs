//! Database module for songsmith.
//!
//! This module provides the persistence layer using SQLite with sqlx:
//! connection pool management, models, repositories, and the retry wrapper
//! every repository write goes through.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

pub use retry::{RetryPolicy, with_retry};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use crate::Result;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;
    // -16000 pages ~ 16MB
    sqlx::query("PRAGMA cache_size = -16000")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Compute a read pool size from available CPU cores.
pub fn default_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(DEFAULT_POOL_SIZE)
}

/// Initialize the connection pool.
///
/// In-memory databases are pinned to a single long-lived connection, since
/// every SQLite connection to `:memory:` sees its own private database.
///
/// # Arguments
/// * `database_url` - SQLite URL (e.g. "sqlite:songsmith.db?mode=rwc")
/// * `max_connections` - Maximum number of connections in the pool
pub async fn init_pool_with_size(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let in_memory = database_url.contains(":memory:");

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true);

    let mut options = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        });

    options = if in_memory {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options.max_connections(max_connections)
    };

    let pool = options.connect_with(connect_options).await?;

    tracing::info!(
        in_memory,
        "Database pool initialized with {} max connections",
        if in_memory { 1 } else { max_connections }
    );

    Ok(pool)
}

/// Initialize the connection pool with the default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    init_pool_with_size(database_url, default_pool_size()).await
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
