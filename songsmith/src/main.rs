use std::sync::Arc;

use songsmith::api::{ApiServer, AppState};
use songsmith::config::AppConfig;
use songsmith::database;
use songsmith::logging::init_logging;
use songsmith::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Initialize logging; the guard flushes the file appender on drop
    let (logging_config, _guard) = init_logging(&config.log_dir)?;

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = Arc::new(ServiceContainer::new(pool, &config));
    let startup = container.initialize().await?;
    if let Some(integrity) = &startup.integrity
        && !integrity.is_clean()
    {
        tracing::warn!(
            orphaned_catalog_links = integrity.orphaned_catalog_links,
            stale_jobs = integrity.stale_jobs,
            "Integrity check reported findings"
        );
    }

    let state = AppState::new(container.generation.clone()).with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state);
    let server_cancel = server.cancel_token();

    let mut server_task = tokio::spawn(async move { server.run().await });

    let server_result = tokio::select! {
        joined = &mut server_task => Some(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_cancel.cancel();
            None
        }
    };
    let server_failed = match server_result {
        Some(joined) => server_exit(joined),
        None => server_exit(server_task.await),
    };

    let report = container.shutdown().await;
    if !report.drained {
        tracing::warn!(
            jobs = ?report.still_running,
            "Exiting with generation jobs still running"
        );
    }

    if server_failed {
        anyhow::bail!("API server stopped unexpectedly");
    }
    tracing::info!("songsmith stopped");
    Ok(())
}

/// Log how the server task ended; true when it failed.
fn server_exit(joined: Result<songsmith::Result<()>, tokio::task::JoinError>) -> bool {
    match joined {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "API server exited with error");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "API server task panicked");
            true
        }
    }
}
