//! Logging setup with a reloadable filter.
//!
//! Console and a daily-rolling file both receive every event that passes the
//! filter. Timestamps use the local timezone. Old files are pruned by the
//! appender itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "songsmith=info,sqlx=warn,tower_http=info";

/// Rolled log files kept on disk.
const MAX_LOG_FILES: usize = 7;

const LOG_FILE_PREFIX: &str = "songsmith";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Runtime handle on the active logging setup.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter, e.g. `"songsmith=debug,sqlx=warn"`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let filter = parse_filter(directive)?;
        self.handle
            .reload(filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {e}")))?;
        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid filter directive '{directive}': {e}")))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. Keep the returned guard alive
/// for the lifetime of the process, or buffered file output is lost.
pub fn init_logging(log_dir: &str) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&log_path)
        .map_err(|e| Error::config(format!("Failed to create log appender: {e}")))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok((
        Arc::new(LoggingConfig {
            handle,
            log_dir: log_path,
        }),
        guard,
    ))
}
