//! Job runner and in-process task registry.
//!
//! A dispatched job either goes to an [`ExternalQueue`] or runs as a tracked
//! background task. Every in-process run holds a registry entry (job id to
//! cancellation token) for exactly as long as it runs; the entry is removed
//! by a drop guard, so completion, failure, cancellation and panics all clean
//! up the same way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::database::models::{GenerationJob, ProgressUpdate};
use crate::database::repositories::GenerationJobRepository;
use crate::generation::error::{ErrorKind, GenerationError, classify};
use crate::generation::pipeline::{GenerationPipeline, PipelineOutcome};
use crate::generation::providers::{ExternalQueue, QueuedGeneration};
use crate::{Error, Result};

/// Registry of running jobs.
///
/// Job tokens are children of one shutdown token, so [`cancel_all`](Self::cancel_all)
/// also cancels any job registered concurrently with the shutdown.
#[derive(Clone)]
pub struct TaskRegistry {
    tokens: Arc<DashMap<String, CancellationToken>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Removes its registry entry when dropped.
pub struct Registration {
    job_id: String,
    token: CancellationToken,
    tokens: Arc<DashMap<String, CancellationToken>>,
}

impl Registration {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.tokens.remove(&self.job_id);
        debug!(job_id = %self.job_id, "Task registry entry removed");
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn shutting_down_error() -> Error {
        GenerationError::new(
            ErrorKind::ServiceUnavailable,
            "generation service is shutting down",
        )
        .into()
    }

    /// Register `job_id`. Fails when shutting down or when the job is already running.
    pub fn register(&self, job_id: &str) -> Result<Registration> {
        if self.shutdown.is_cancelled() {
            return Err(Self::shutting_down_error());
        }
        let token = self.shutdown.child_token();
        match self.tokens.entry(job_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::Other(format!("job {job_id} is already running")));
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        Ok(Registration {
            job_id: job_id.to_string(),
            token,
            tokens: self.tokens.clone(),
        })
    }

    /// Register `job_id` and run `task` on the tracker with its token.
    pub fn spawn<F, Fut>(&self, job_id: &str, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let registration = self.register(job_id)?;
        let fut = task(registration.token().clone());
        self.tracker.spawn(async move {
            let _registration = registration;
            fut.await;
        });
        Ok(())
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.tokens.contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.tokens.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Trigger every registered token and refuse new registrations.
    /// Returns the number of jobs that were running.
    pub fn cancel_all(&self) -> usize {
        let running = self.tokens.len();
        self.shutdown.cancel();
        self.tracker.close();
        running
    }

    /// Wait for tracked tasks, up to `timeout`. Returns `true` if all finished.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// Where a dispatched job went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Enqueued { queue: String },
    Spawned,
}

/// Result of [`JobRunner::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs running when the signal was sent.
    pub cancelled: usize,
    /// Whether every task finished before the timeout.
    pub drained: bool,
    /// Jobs still registered after the wait.
    pub still_running: Vec<String>,
}

pub struct JobRunner {
    pipeline: Arc<GenerationPipeline>,
    jobs: Arc<dyn GenerationJobRepository>,
    registry: TaskRegistry,
    queue: Option<Arc<dyn ExternalQueue>>,
}

impl JobRunner {
    pub fn new(
        pipeline: Arc<GenerationPipeline>,
        jobs: Arc<dyn GenerationJobRepository>,
        queue: Option<Arc<dyn ExternalQueue>>,
    ) -> Self {
        Self {
            pipeline,
            jobs,
            registry: TaskRegistry::new(),
            queue,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Hand `job` to the external queue, or spawn it in-process.
    ///
    /// An enqueue failure falls back to an in-process run.
    pub async fn dispatch(&self, job: &GenerationJob) -> Result<Dispatch> {
        if let Some(queue) = &self.queue {
            let payload = QueuedGeneration {
                job_id: job.id.clone(),
                owner_id: job.owner_id.clone(),
            };
            match queue.enqueue(&payload).await {
                Ok(()) => {
                    info!(job_id = %job.id, queue = queue.name(), "Generation enqueued");
                    return Ok(Dispatch::Enqueued {
                        queue: queue.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        queue = queue.name(),
                        error = %e,
                        "Enqueue failed, running in-process"
                    );
                }
            }
        }

        self.spawn(&job.id)?;
        Ok(Dispatch::Spawned)
    }

    /// Run `job_id` as a tracked background task.
    pub fn spawn(&self, job_id: &str) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let jobs = self.jobs.clone();
        let id = job_id.to_string();
        self.registry.spawn(job_id, move |token| async move {
            run_to_end(&pipeline, jobs.as_ref(), &id, &token).await;
        })?;
        debug!(job_id, "Generation task spawned");
        Ok(())
    }

    /// Run `job_id` on the caller's task, registered like a spawned run.
    ///
    /// This is the entry point for external queue consumers.
    pub async fn run_inline(&self, job_id: &str) -> Result<PipelineOutcome> {
        let registration = self.registry.register(job_id)?;
        self.pipeline.run(job_id, registration.token()).await
    }

    /// Cancel every running job and wait up to `timeout` for them to finalize.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "Cancelling running generation jobs");

        let drained = self.registry.wait(timeout).await;
        let still_running = self.registry.active_jobs();
        if drained {
            info!("All generation tasks finished");
        } else {
            warn!(
                remaining = still_running.len(),
                "Shutdown timeout reached with generation tasks still running"
            );
        }

        ShutdownReport {
            cancelled,
            drained,
            still_running,
        }
    }
}

async fn run_to_end(
    pipeline: &GenerationPipeline,
    jobs: &dyn GenerationJobRepository,
    job_id: &str,
    token: &CancellationToken,
) {
    match pipeline.run(job_id, token).await {
        Ok(outcome) => debug!(job_id, ?outcome, "Generation task finished"),
        Err(Error::InvalidStateTransition { from, .. }) => {
            warn!(job_id, status = %from, "Generation task skipped, job is not queued");
        }
        Err(err) => {
            let classified = classify(&err);
            error!(job_id, kind = %classified.kind, error = %err, "Generation task failed");
            let message = format!("generation failed: {}", classified.message);
            if let Err(e) = jobs
                .mark_failed(job_id, &message, &ProgressUpdate::default())
                .await
            {
                error!(job_id, error = %e, "Failed to record generation failure");
            }
        }
    }
}
