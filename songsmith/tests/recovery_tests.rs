//! Startup recovery sweep and integrity check.

mod common;

use chrono::{Duration, Utc};
use common::*;
use songsmith::database::models::{GenerationJob, JobStatus};
use songsmith::database::repositories::{
    GenerationJobRepository, SqlxCatalogRepository, SqlxGenerationJobRepository,
};
use songsmith::generation::INTERRUPTED_MESSAGE;
use songsmith::generation::providers::{CatalogLinker, GeneratedMedia, LinkedItem};
use songsmith::services::ServiceContainer;

fn job_created_ago(owner: &str, source: &str, minutes: i64) -> GenerationJob {
    let mut job = GenerationJob::new_queued(owner, request(source, &["t1", "t2"]));
    job.created_at = Utc::now() - Duration::minutes(minutes);
    job
}

#[tokio::test]
async fn test_sweep_fails_only_stale_jobs() {
    let pool = setup_test_db().await;
    let repo = SqlxGenerationJobRepository::new(pool.clone());

    let stale_processing = job_created_ago("owner-1", "album-1", 31);
    repo.create_job(&stale_processing).await.unwrap();
    repo.mark_started(&stale_processing.id).await.unwrap();

    let stale_queued = job_created_ago("owner-1", "album-2", 45);
    repo.create_job(&stale_queued).await.unwrap();

    let recent = job_created_ago("owner-1", "album-3", 10);
    repo.create_job(&recent).await.unwrap();
    repo.mark_started(&recent.id).await.unwrap();

    let providers = ScriptedProviders::new();
    let container =
        ServiceContainer::with_providers(pool, &test_config(), providers.providers(), None);
    let startup = container.initialize().await.unwrap();

    assert_eq!(startup.sweep.found, 2);
    assert_eq!(startup.sweep.recovered.len(), 2);
    assert_eq!(startup.sweep.skipped, 0);
    assert!(startup.integrity.unwrap().is_clean());

    let service = &container.generation;
    for id in [&stale_processing.id, &stale_queued.id] {
        let job = service.get_progress(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(job.completed_at.is_some());
    }

    let untouched = service.get_progress(&recent.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, JobStatus::Processing);
    assert!(untouched.error_message.is_none());

    // The sweep never runs pipelines for the jobs it recovers.
    assert_eq!(providers.calls(FETCH), 0);
}

#[tokio::test]
async fn test_terminal_jobs_are_not_swept() {
    let pool = setup_test_db().await;
    let repo = SqlxGenerationJobRepository::new(pool.clone());

    let done = job_created_ago("owner-1", "album-1", 120);
    repo.create_job(&done).await.unwrap();
    repo.mark_started(&done.id).await.unwrap();
    repo.mark_completed(&done.id, &Default::default())
        .await
        .unwrap();

    let providers = ScriptedProviders::new();
    let container =
        ServiceContainer::with_providers(pool, &test_config(), providers.providers(), None);
    let startup = container.initialize().await.unwrap();

    assert_eq!(startup.sweep.found, 0);
    let job = container.generation.get_progress(&done.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_integrity_check_reports_orphans_without_repair() {
    let pool = setup_test_db().await;
    let catalog = SqlxCatalogRepository::new(pool.clone());
    let item = LinkedItem {
        item_id: "t1".to_string(),
        owner_id: "owner-1".to_string(),
        title: "Lost".to_string(),
        language: "en".to_string(),
        visibility: "private".to_string(),
    };
    let media = GeneratedMedia {
        lyrics: "la la".to_string(),
        audio_url: "https://cdn.test/audio/t1.mp3".to_string(),
        artwork_url: None,
    };
    catalog
        .link_generated_item("deleted-job", &item, &media)
        .await
        .unwrap();

    let providers = ScriptedProviders::new();
    let container =
        ServiceContainer::with_providers(pool, &test_config(), providers.providers(), None);
    let startup = container.initialize().await.unwrap();

    let integrity = startup.integrity.unwrap();
    assert_eq!(integrity.orphaned_catalog_links, 1);
    assert_eq!(integrity.stale_jobs, 0);
    assert!(!integrity.is_clean());

    // Reported, not removed.
    assert_eq!(catalog.count_for_job("deleted-job").await.unwrap(), 1);
    assert!(container.generation.is_ready());
}
