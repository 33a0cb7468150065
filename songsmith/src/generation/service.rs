//! Generation service: the surface HTTP and CLI layers call into.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::GenerationConfig;
use crate::database::models::{GenerationJob, ProgressUpdate};
use crate::database::repositories::GenerationJobRepository;
use crate::database::retry::RetryPolicy;
use crate::generation::error::{ErrorKind, GenerationError, classify};
use crate::generation::pipeline::{Collaborators, GenerationPipeline, PipelineOutcome};
use crate::generation::providers::{CatalogIntegrity, ExternalQueue};
use crate::generation::recovery::{IntegrityReport, RecoverySweep, SweepReport};
use crate::generation::request::GenerationRequest;
use crate::generation::runner::{Dispatch, JobRunner, ShutdownReport};
use crate::Result;

/// Page size ceiling for [`GenerationService::list_jobs`].
pub const MAX_PAGE_SIZE: u32 = 100;

/// An accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    pub total_items: u32,
    pub dispatch: Dispatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub sweep: SweepReport,
    /// `None` when the check itself failed.
    pub integrity: Option<IntegrityReport>,
}

pub struct GenerationService {
    jobs: Arc<dyn GenerationJobRepository>,
    runner: JobRunner,
    recovery: RecoverySweep,
    config: GenerationConfig,
    ready: AtomicBool,
}

impl GenerationService {
    pub fn new(
        jobs: Arc<dyn GenerationJobRepository>,
        collaborators: Collaborators,
        integrity: Option<Arc<dyn CatalogIntegrity>>,
        queue: Option<Arc<dyn ExternalQueue>>,
        config: GenerationConfig,
        retry: RetryPolicy,
    ) -> Self {
        let pipeline = Arc::new(GenerationPipeline::new(jobs.clone(), collaborators, retry));
        let queue = if config.use_external_queue { queue } else { None };
        let runner = JobRunner::new(pipeline, jobs.clone(), queue);
        let recovery = RecoverySweep::new(
            jobs.clone(),
            integrity,
            chrono::Duration::minutes(config.stale_after_minutes as i64),
        );
        Self {
            jobs,
            runner,
            recovery,
            config,
            ready: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.runner.registry().is_shutting_down()
    }

    pub fn active_job_count(&self) -> usize {
        self.runner.registry().active_count()
    }

    /// Validate, persist and dispatch a request. The job runs in the background.
    pub async fn submit(&self, owner_id: &str, request: GenerationRequest) -> Result<Submission> {
        if !self.is_ready() {
            return Err(GenerationError::new(
                ErrorKind::ServiceUnavailable,
                "generation service is not accepting submissions",
            )
            .into());
        }

        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(
                GenerationError::validation(ErrorKind::InvalidRequest, "owner id is required")
                    .into(),
            );
        }

        let request = request.normalize(&self.config)?;

        let active = self.jobs.find_all_active(owner_id).await?;
        if let Some(existing) = active.iter().find(|j| j.source_ref == request.source_ref) {
            return Err(GenerationError::validation(
                ErrorKind::DuplicateSubmission,
                format!(
                    "a generation for '{}' is already in progress",
                    request.source_ref
                ),
            )
            .with_context("job_id", existing.id.clone())
            .into());
        }
        if active.len() as u32 >= self.config.max_active_jobs_per_owner {
            return Err(GenerationError::validation(
                ErrorKind::TooManyActiveJobs,
                format!(
                    "owner already has {} active generations (limit {})",
                    active.len(),
                    self.config.max_active_jobs_per_owner
                ),
            )
            .into());
        }

        let job = GenerationJob::new_queued(owner_id, request);
        self.jobs.create_job(&job).await?;
        info!(
            job_id = %job.id,
            owner_id,
            total_items = job.total_items,
            "Generation job accepted"
        );

        match self.runner.dispatch(&job).await {
            Ok(dispatch) => Ok(Submission {
                job_id: job.id,
                total_items: job.total_items,
                dispatch,
            }),
            Err(err) => {
                let message = format!(
                    "generation could not be scheduled: {}",
                    classify(&err).message
                );
                if let Err(e) = self
                    .jobs
                    .mark_failed(&job.id, &message, &ProgressUpdate::default())
                    .await
                {
                    error!(job_id = %job.id, error = %e, "Failed to record scheduling failure");
                }
                Err(err)
            }
        }
    }

    /// Polling snapshot of a job.
    pub async fn get_progress(&self, job_id: &str) -> Result<Option<GenerationJob>> {
        self.jobs.get_job(job_id).await
    }

    /// Jobs of one owner, newest first.
    pub async fn list_jobs(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GenerationJob>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.jobs.list_jobs_for_owner(owner_id, limit, offset).await
    }

    /// Execute a job delivered by an external queue on the current task.
    pub async fn run_queued(&self, job_id: &str) -> Result<PipelineOutcome> {
        self.runner.run_inline(job_id).await
    }

    /// Run the recovery sweep and integrity check, then open for submissions.
    pub async fn on_startup(&self) -> Result<StartupReport> {
        let sweep = self.recovery.sweep().await?;
        let integrity = match self.recovery.check_integrity().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Integrity check failed");
                None
            }
        };

        self.ready.store(true, Ordering::Release);
        info!(
            recovered = sweep.recovered.len(),
            "Generation service ready"
        );
        Ok(StartupReport { sweep, integrity })
    }

    /// Stop accepting submissions, cancel running jobs and wait for them.
    pub async fn on_shutdown(&self) -> ShutdownReport {
        self.ready.store(false, Ordering::Release);
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        let report = self.runner.shutdown(timeout).await;

        if !report.still_running.is_empty() {
            // The sweep on the next start fails these once they go stale.
            warn!(jobs = ?report.still_running, "Generation jobs left unfinalized");
        }
        report
    }
}
