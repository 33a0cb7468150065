//! Shared fixtures for the integration tests.
//!
//! `ScriptedProviders` implements every generation-side trait. Failures are
//! scripted per `(step, item_ref)`; a gate can park one call until the test
//! releases it.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use songsmith::config::AppConfig;
use songsmith::database::models::{GenerationJob, JobKind, LanguageMode};
use songsmith::database::repositories::{SqlxCatalogRepository, SqlxGenerationJobRepository};
use songsmith::database::{DbPool, RetryPolicy, init_pool, run_migrations};
use songsmith::generation::providers::{
    Artwork, ArtworkProvider, ArtworkRequest, Audio, AudioProvider, AudioRequest, CatalogLinker,
    ContentSource, ExternalQueue, GeneratedMedia, ItemContent, LinkedItem, Lyrics,
    LyricsProvider, LyricsRequest, ProviderError, ProviderResult, QueuedGeneration,
};
use songsmith::generation::{Collaborators, GenerationRequest, GenerationService, ItemSpec};
use songsmith::services::{GenerationProviders, ServiceContainer};

pub const FETCH: &str = "fetch_content";
pub const LYRICS: &str = "generate_lyrics";
pub const ARTWORK: &str = "generate_artwork";
pub const AUDIO: &str = "generate_audio";

/// Helper to create a test database pool with migrations applied.
pub async fn setup_test_db() -> DbPool {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Defaults with fast retries and three supported languages.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.generation.supported_languages =
        vec!["en".to_string(), "de".to_string(), "ja".to_string()];
    config.generation.shutdown_timeout_secs = 5;
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        max_jitter_ms: 0,
    };
    config
}

pub fn request(source_ref: &str, items: &[&str]) -> GenerationRequest {
    GenerationRequest {
        kind: if items.len() == 1 {
            JobKind::SingleItem
        } else {
            JobKind::MultiItem
        },
        source_ref: source_ref.to_string(),
        items: items.iter().map(|i| ItemSpec::new(*i)).collect(),
        language_mode: LanguageMode::Single,
        languages: Vec::new(),
        target_visibility: "private".to_string(),
        style: None,
    }
}

struct Gate {
    step: &'static str,
    item_ref: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// Handles for a parked provider call.
pub struct GateHandle {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct ScriptedProviders {
    queued_errors: Mutex<HashMap<(&'static str, String), VecDeque<ProviderError>>>,
    permanent_errors: Mutex<HashMap<(&'static str, String), ProviderError>>,
    calls: Mutex<Vec<(&'static str, String)>>,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedProviders {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `errors.len()` calls of `step` for `item_ref`, in order.
    pub fn fail_times(&self, step: &'static str, item_ref: &str, errors: Vec<ProviderError>) {
        self.queued_errors
            .lock()
            .insert((step, item_ref.to_string()), errors.into());
    }

    /// Fail every call of `step` for `item_ref`.
    pub fn fail_always(&self, step: &'static str, item_ref: &str, error: ProviderError) {
        self.permanent_errors
            .lock()
            .insert((step, item_ref.to_string()), error);
    }

    /// Park the first call of `step` for `item_ref` until `release` is notified.
    pub fn block_at(&self, step: &'static str, item_ref: &str) -> GateHandle {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock() = Some(Gate {
            step,
            item_ref: item_ref.to_string(),
            entered: entered.clone(),
            release: release.clone(),
        });
        GateHandle { entered, release }
    }

    pub fn calls(&self, step: &str) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == step).count()
    }

    pub fn calls_for(&self, step: &str, item_ref: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(s, i)| *s == step && i == item_ref)
            .count()
    }

    pub fn providers(self: &Arc<Self>) -> GenerationProviders {
        GenerationProviders {
            content: self.clone(),
            lyrics: self.clone(),
            artwork: self.clone(),
            audio: self.clone(),
        }
    }

    async fn call(&self, step: &'static str, item_ref: &str) -> ProviderResult<()> {
        self.calls.lock().push((step, item_ref.to_string()));

        let gate = self
            .gate
            .lock()
            .take_if(|g| g.step == step && g.item_ref == item_ref);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let key = (step, item_ref.to_string());
        if let Some(err) = self.permanent_errors.lock().get(&key).cloned() {
            return Err(err);
        }
        let queued = self
            .queued_errors
            .lock()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        match queued {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedProviders {
    async fn fetch_item_content(
        &self,
        source_ref: &str,
        item_ref: &str,
    ) -> ProviderResult<ItemContent> {
        self.call(FETCH, item_ref).await?;
        Ok(ItemContent {
            item_ref: item_ref.to_string(),
            title: format!("{source_ref} / {item_ref}"),
            body: format!("source text of {item_ref}"),
        })
    }
}

#[async_trait]
impl LyricsProvider for ScriptedProviders {
    async fn generate_lyrics(&self, request: &LyricsRequest) -> ProviderResult<Lyrics> {
        self.call(LYRICS, &request.item_ref).await?;
        Ok(Lyrics {
            text: format!("[{}] verse about {}", request.language, request.title),
        })
    }
}

#[async_trait]
impl ArtworkProvider for ScriptedProviders {
    async fn generate_artwork(&self, request: &ArtworkRequest) -> ProviderResult<Artwork> {
        self.call(ARTWORK, &request.item_ref).await?;
        Ok(Artwork {
            url: format!("https://cdn.test/art/{}.png", request.item_ref),
        })
    }
}

#[async_trait]
impl AudioProvider for ScriptedProviders {
    async fn generate_audio(&self, request: &AudioRequest) -> ProviderResult<Audio> {
        self.call(AUDIO, &request.item_ref).await?;
        Ok(Audio {
            url: format!(
                "https://cdn.test/audio/{}-{}.mp3",
                request.item_ref, request.language
            ),
            duration_secs: Some(180.0),
        })
    }
}

/// External queue that records payloads, or refuses them.
pub struct RecordingQueue {
    pub refuse: bool,
    pub received: Mutex<Vec<QueuedGeneration>>,
}

impl RecordingQueue {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            refuse: false,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            received: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ExternalQueue for RecordingQueue {
    fn name(&self) -> &str {
        "recording"
    }

    async fn enqueue(&self, job: &QueuedGeneration) -> songsmith::Result<()> {
        if self.refuse {
            return Err(songsmith::Error::Other("queue connection refused".into()));
        }
        self.received.lock().push(job.clone());
        Ok(())
    }
}

/// How a scripted catalog link fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    /// Connection reset: retried by the pipeline.
    Transient,
    /// Storage rejection: never retried.
    Permanent,
}

impl LinkFailure {
    fn to_error(self) -> songsmith::Error {
        match self {
            Self::Transient => songsmith::Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            )),
            Self::Permanent => songsmith::Error::Database("catalog row rejected".into()),
        }
    }
}

/// Catalog linker over the real SQL repository with per-item failures and
/// an attempt counter.
pub struct ScriptedCatalog {
    inner: SqlxCatalogRepository,
    failures: Mutex<HashMap<String, LinkFailure>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl ScriptedCatalog {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self {
            inner: SqlxCatalogRepository::new(pool),
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail_always(&self, item_id: &str, failure: LinkFailure) {
        self.failures.lock().insert(item_id.to_string(), failure);
    }

    pub fn attempts(&self, item_id: &str) -> usize {
        self.attempts.lock().get(item_id).copied().unwrap_or(0)
    }

    pub async fn count_for_job(&self, job_id: &str) -> u64 {
        self.inner
            .count_for_job(job_id)
            .await
            .expect("Failed to count catalog rows")
    }
}

#[async_trait]
impl CatalogLinker for ScriptedCatalog {
    async fn link_generated_item(
        &self,
        job_id: &str,
        item: &LinkedItem,
        media: &GeneratedMedia,
    ) -> songsmith::Result<String> {
        *self.attempts.lock().entry(item.item_id.clone()).or_default() += 1;
        let failure = self.failures.lock().get(&item.item_id).copied();
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        self.inner.link_generated_item(job_id, item, media).await
    }
}

/// Ready service whose catalog side is `catalog`, on the catalog's pool.
pub async fn service_with_catalog(
    pool: DbPool,
    providers: &Arc<ScriptedProviders>,
    catalog: Arc<ScriptedCatalog>,
) -> GenerationService {
    let config = test_config();
    let jobs = Arc::new(SqlxGenerationJobRepository::with_retry_policy(
        pool,
        config.retry.clone(),
    ));
    let collaborators = Collaborators {
        content: providers.clone(),
        lyrics: providers.clone(),
        artwork: providers.clone(),
        audio: providers.clone(),
        catalog,
    };
    let service = GenerationService::new(
        jobs,
        collaborators,
        None,
        None,
        config.generation.clone(),
        config.retry.clone(),
    );
    service
        .on_startup()
        .await
        .expect("Failed to run startup sweep");
    service
}

/// Container wired to scripted providers, not yet initialized.
pub async fn build_container(
    providers: &Arc<ScriptedProviders>,
    queue: Option<Arc<dyn ExternalQueue>>,
    config: AppConfig,
) -> ServiceContainer {
    let pool = setup_test_db().await;
    ServiceContainer::with_providers(pool, &config, providers.providers(), queue)
}

/// Container wired to scripted providers, after the startup sweep.
pub async fn ready_container(providers: &Arc<ScriptedProviders>) -> ServiceContainer {
    let container = build_container(providers, None, test_config()).await;
    container
        .initialize()
        .await
        .expect("Failed to initialize services");
    container
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(service: &GenerationService, job_id: &str) -> GenerationJob {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = service
                .get_progress(job_id)
                .await
                .expect("Failed to read job")
                .expect("Job missing");
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Job did not finish in time")
}
