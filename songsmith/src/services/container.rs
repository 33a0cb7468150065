//! Service container for dependency injection.
//!
//! The ServiceContainer wires repositories, providers and the generation
//! service together and owns their lifecycle.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SqlxCatalogRepository, SqlxGenerationJobRepository};
use crate::generation::providers::{
    ArtworkProvider, AudioProvider, ContentSource, ExternalQueue, HttpProviders, LyricsProvider,
};
use crate::generation::{Collaborators, GenerationService, ShutdownReport, StartupReport};

/// Content and generation providers, without the catalog side.
#[derive(Clone)]
pub struct GenerationProviders {
    pub content: Arc<dyn ContentSource>,
    pub lyrics: Arc<dyn LyricsProvider>,
    pub artwork: Arc<dyn ArtworkProvider>,
    pub audio: Arc<dyn AudioProvider>,
}

impl GenerationProviders {
    /// All four backed by one HTTP client.
    pub fn http(providers: HttpProviders) -> Self {
        let shared = Arc::new(providers);
        Self {
            content: shared.clone(),
            lyrics: shared.clone(),
            artwork: shared.clone(),
            audio: shared,
        }
    }
}

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub catalog: Arc<SqlxCatalogRepository>,
    pub generation: Arc<GenerationService>,
}

impl ServiceContainer {
    /// Wire the container with HTTP providers from `config`.
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Self {
        let providers = GenerationProviders::http(HttpProviders::new(config.providers.clone()));
        Self::with_providers(pool, config, providers, None)
    }

    /// Wire the container with explicit providers and an optional external queue.
    pub fn with_providers(
        pool: SqlitePool,
        config: &AppConfig,
        providers: GenerationProviders,
        queue: Option<Arc<dyn ExternalQueue>>,
    ) -> Self {
        let jobs = Arc::new(SqlxGenerationJobRepository::with_retry_policy(
            pool.clone(),
            config.retry.clone(),
        ));
        let catalog = Arc::new(SqlxCatalogRepository::with_retry_policy(
            pool.clone(),
            config.retry.clone(),
        ));

        let collaborators = Collaborators {
            content: providers.content,
            lyrics: providers.lyrics,
            artwork: providers.artwork,
            audio: providers.audio,
            catalog: catalog.clone(),
        };

        let generation = Arc::new(GenerationService::new(
            jobs,
            collaborators,
            Some(catalog.clone()),
            queue,
            config.generation.clone(),
            config.retry.clone(),
        ));

        Self {
            pool,
            catalog,
            generation,
        }
    }

    /// Run startup recovery; the generation service accepts work afterwards.
    pub async fn initialize(&self) -> Result<StartupReport> {
        info!("Initializing services...");
        let report = self.generation.on_startup().await?;
        info!(
            recovered = report.sweep.recovered.len(),
            "Services initialized"
        );
        Ok(report)
    }

    /// Cancel running generations, wait for them, then close the pool.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down services...");

        let report = self.generation.on_shutdown().await;
        info!(
            cancelled = report.cancelled,
            drained = report.drained,
            "Generation service stopped"
        );

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        report
    }
}
