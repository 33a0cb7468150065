//! End-to-end pipeline scenarios against scripted providers and a real
//! in-memory store.

mod common;

use common::*;
use songsmith::database::models::{JobPhase, JobStatus, LanguageMode};
use songsmith::generation::providers::ProviderError;
use std::time::Duration;

mod best_effort {
    use super::*;

    #[tokio::test]
    async fn test_partial_failure_completes_job() {
        let providers = ScriptedProviders::new();
        providers.fail_always(AUDIO, "t2", ProviderError::Rejected("voice not allowed".into()));
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("album-1", &["t1", "t2", "t3"]))
            .await
            .expect("submit failed");
        assert_eq!(submission.total_items, 3);

        let job = wait_terminal(service, &submission.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.phase, JobPhase::Completed);
        assert_eq!(job.successful_items, 2);
        assert_eq!(job.failed_items, 1);
        assert_eq!(job.percent_complete, 100);
        assert!(job.completed_at.is_some());
        assert!(job.error_message.is_none());

        let ids: Vec<&str> = job.item_results.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        let failed = &job.item_results[1];
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().starts_with("generate_audio:"));
        assert!(failed.produced_entity_id.is_none());
        assert!(job.item_results[0].produced_entity_id.is_some());

        // A permanent failure is not retried.
        assert_eq!(providers.calls_for(AUDIO, "t2"), 1);
        assert_eq!(
            container.catalog.count_for_job(&job.id).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_all_items_failing_fails_job() {
        let providers = ScriptedProviders::new();
        for item in ["t1", "t2"] {
            providers.fail_always(
                FETCH,
                item,
                ProviderError::Status {
                    status: 404,
                    message: "no such item".into(),
                },
            );
        }
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("album-1", &["t1", "t2"]))
            .await
            .unwrap();
        let job = wait_terminal(service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.successful_items, 0);
        assert_eq!(job.failed_items, 2);
        let message = job.error_message.unwrap();
        assert!(
            message.starts_with("all 2 items failed; first error: fetch_content:"),
            "{message}"
        );
        assert_eq!(providers.calls(LYRICS), 0);
    }

    #[tokio::test]
    async fn test_artwork_failure_is_not_fatal() {
        let providers = ScriptedProviders::new();
        providers.fail_always(ARTWORK, "t1", ProviderError::Unavailable { status: 503 });
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("single-1", &["t1"]))
            .await
            .unwrap();
        let job = wait_terminal(service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let result = &job.item_results[0];
        assert!(result.success);
        assert!(result.artwork_error.is_some());
        // Transient, so retried up to the policy limit.
        assert_eq!(providers.calls(ARTWORK), 3);
        assert_eq!(providers.calls(AUDIO), 1);
    }

    #[tokio::test]
    async fn test_all_languages_mode_expands_units() {
        let providers = ScriptedProviders::new();
        providers.fail_always(LYRICS, "t2", ProviderError::Rejected("blocked".into()));
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let mut req = request("album-ml", &["t1", "t2"]);
        req.language_mode = LanguageMode::All;
        req.languages = vec!["EN".to_string(), "de".to_string()];

        let submission = service.submit("owner-1", req).await.unwrap();
        assert_eq!(submission.total_items, 4);
        let job = wait_terminal(service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let ids: Vec<&str> = job.item_results.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["t1:en", "t1:de", "t2:en", "t2:de"]);
        assert_eq!(job.successful_items, 2);
        assert!(job.generated_languages.contains("en"));
        assert!(job.generated_languages.contains("de"));
        assert!(job.failed_languages.contains("de"));
        assert_eq!(
            container.catalog.count_for_job(&job.id).await.unwrap(),
            2
        );
    }
}

mod retries {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_recover() {
        let providers = ScriptedProviders::new();
        providers.fail_times(
            LYRICS,
            "t1",
            vec![
                ProviderError::Timeout(Duration::from_secs(120)),
                ProviderError::RateLimited { retry_after: None },
            ],
        );
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("single-1", &["t1"]))
            .await
            .unwrap();
        let job = wait_terminal(service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(providers.calls(LYRICS), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_capped() {
        let providers = ScriptedProviders::new();
        providers.fail_times(
            LYRICS,
            "t1",
            vec![
                ProviderError::Network("reset".into()),
                ProviderError::Network("reset".into()),
                ProviderError::Network("reset".into()),
            ],
        );
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("single-1", &["t1"]))
            .await
            .unwrap();
        let job = wait_terminal(service, &submission.job_id).await;

        // A fourth attempt would have succeeded, but three is the limit.
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(providers.calls(LYRICS), 3);
        assert!(job.error_message.unwrap().contains("generate_lyrics"));
    }
}

mod progress {
    use super::*;

    #[tokio::test]
    async fn test_progress_visible_mid_run() {
        let providers = ScriptedProviders::new();
        let gate = providers.block_at(AUDIO, "t2");
        let container = ready_container(&providers).await;
        let service = &container.generation;

        let submission = service
            .submit("owner-1", request("album-1", &["t1", "t2", "t3"]))
            .await
            .unwrap();
        gate.entered.notified().await;

        let job = service.get_progress(&submission.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.phase, JobPhase::GeneratingAudio);
        assert_eq!(job.current_item, 2);
        assert_eq!(job.successful_items, 1);
        assert_eq!(job.percent_complete, 33);
        assert_eq!(
            job.sub_phase.as_deref(),
            Some("item 2/3 [en] step 4/5 generate_audio")
        );
        assert!(job.started_at.is_some());

        gate.release.notify_one();
        let job = wait_terminal(service, &submission.job_id).await;
        assert_eq!(job.successful_items, 3);
        assert_eq!(job.current_item, 3);
    }
}

mod linking {
    use super::*;

    #[tokio::test]
    async fn test_link_failure_fails_only_that_item() {
        let pool = setup_test_db().await;
        let providers = ScriptedProviders::new();
        let catalog = ScriptedCatalog::new(pool.clone());
        catalog.fail_always("t2", LinkFailure::Permanent);
        let service = service_with_catalog(pool, &providers, catalog.clone()).await;

        let submission = service
            .submit("owner-1", request("album-1", &["t1", "t2", "t3"]))
            .await
            .unwrap();
        let job = wait_terminal(&service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.successful_items, 2);
        assert_eq!(job.failed_items, 1);

        let linked = &job.item_results[1];
        assert_eq!(linked.item_id, "t2");
        assert!(!linked.success);
        assert!(linked.produced_entity_id.is_none());
        assert!(
            linked
                .error
                .as_deref()
                .unwrap()
                .starts_with("persist_and_link:")
        );
        // Every earlier step ran for the failed item.
        assert_eq!(providers.calls_for(AUDIO, "t2"), 1);
        assert_eq!(catalog.attempts("t2"), 1);
        assert_eq!(catalog.count_for_job(&job.id).await, 2);
    }

    #[tokio::test]
    async fn test_transient_link_failure_stops_at_attempt_limit() {
        let pool = setup_test_db().await;
        let providers = ScriptedProviders::new();
        let catalog = ScriptedCatalog::new(pool.clone());
        catalog.fail_always("t1", LinkFailure::Transient);
        let service = service_with_catalog(pool, &providers, catalog.clone()).await;

        let submission = service
            .submit("owner-1", request("single-1", &["t1"]))
            .await
            .unwrap();
        let job = wait_terminal(&service, &submission.job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(
            job.error_message
                .as_deref()
                .unwrap()
                .contains("persist_and_link:")
        );
        assert_eq!(catalog.attempts("t1"), 3);
        assert_eq!(catalog.count_for_job(&job.id).await, 0);
    }
}
