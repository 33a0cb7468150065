//! The generation pipeline.
//!
//! A job expands into ordered work units (see
//! [`GenerationRequest::work_units`](crate::generation::request::GenerationRequest::work_units)).
//! Each unit runs five steps strictly in sequence:
//!
//! ```text
//! fetch_content -> generate_lyrics -> generate_artwork -> generate_audio -> persist_and_link
//! ```
//!
//! Every step call goes through [`with_retry`]. A failed step fails its unit
//! but not the batch, except artwork, whose failure is only recorded. The
//! cancellation token is checked before every step; a cancelled job is
//! finalized as failed with [`ABORTED_MESSAGE`] and the unit in flight is
//! not recorded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::database::models::{GenerationJob, ItemResult, JobPhase};
use crate::database::repositories::GenerationJobRepository;
use crate::database::retry::{RetryPolicy, with_retry};
use crate::generation::error::classify;
use crate::generation::progress::ProgressTracker;
use crate::generation::providers::{
    ArtworkProvider, ArtworkRequest, AudioProvider, AudioRequest, CatalogLinker, ContentSource,
    GeneratedMedia, LinkedItem, LyricsProvider, LyricsRequest,
};
use crate::generation::request::WorkUnit;
use crate::{Error, Result};

/// Error message of a job stopped by the shutdown signal.
pub const ABORTED_MESSAGE: &str = "generation aborted (service restart)";

/// External collaborators the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentSource>,
    pub lyrics: Arc<dyn LyricsProvider>,
    pub artwork: Arc<dyn ArtworkProvider>,
    pub audio: Arc<dyn AudioProvider>,
    pub catalog: Arc<dyn CatalogLinker>,
}

/// Pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    FetchContent,
    GenerateLyrics,
    GenerateArtwork,
    GenerateAudio,
    PersistAndLink,
}

impl Step {
    pub const COUNT: u32 = 5;

    pub fn phase(self) -> JobPhase {
        match self {
            Self::FetchContent => JobPhase::FetchingContent,
            Self::GenerateLyrics => JobPhase::GeneratingLyrics,
            Self::GenerateArtwork => JobPhase::GeneratingArtwork,
            Self::GenerateAudio => JobPhase::GeneratingAudio,
            Self::PersistAndLink => JobPhase::Linking,
        }
    }

    /// 1-based position in the step list.
    pub fn number(self) -> u32 {
        self as u32 + 1
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// At least one unit succeeded.
    Completed { successful: u32, failed: u32 },
    /// No unit succeeded, or the run hit a store failure.
    Failed { message: String },
    /// Cancelled between steps.
    Aborted,
}

enum UnitOutcome {
    /// The unit ended at `Step`, successfully or not.
    Finished(ItemResult, Step),
    Aborted,
}

/// Where the pipeline stands inside one unit.
struct Cursor<'a> {
    job: &'a GenerationJob,
    unit: &'a WorkUnit,
    index: u32,
    total: u32,
}

impl Cursor<'_> {
    fn sub_phase(&self, step: Step) -> String {
        format!(
            "item {}/{} [{}] step {}/{} {}",
            self.index,
            self.total,
            self.unit.language,
            step.number(),
            Step::COUNT,
            step
        )
    }
}

pub struct GenerationPipeline {
    jobs: Arc<dyn GenerationJobRepository>,
    collaborators: Collaborators,
    retry: RetryPolicy,
}

impl GenerationPipeline {
    pub fn new(
        jobs: Arc<dyn GenerationJobRepository>,
        collaborators: Collaborators,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            collaborators,
            retry,
        }
    }

    /// Drive a queued job to a terminal state.
    ///
    /// Returns `Err` only when the job could not be started (missing, or not
    /// queued). Once started, every path ends with the job finalized or with
    /// the finalizing write itself failing.
    pub async fn run(&self, job_id: &str, cancel: &CancellationToken) -> Result<PipelineOutcome> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found("GenerationJob", job_id))?;

        let span = info_span!("generation", job_id = %job.id, owner_id = %job.owner_id);
        async move {
            self.jobs.mark_started(&job.id).await?;
            info!(total_items = job.total_items, kind = %job.kind, "Generation started");

            let mut tracker = ProgressTracker::new(job.total_items);
            match self.execute(&job, &mut tracker, cancel).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    let classified = classify(&err);
                    let message = format!("generation failed: {}", classified.message);
                    warn!(kind = %classified.kind, error = %err, "Generation stopped by store failure");
                    let update = tracker.snapshot(JobPhase::Failed, None);
                    if let Err(e) = self.jobs.mark_failed(&job.id, &message, &update).await {
                        warn!(error = %e, "Failed to record generation failure");
                        return Err(e);
                    }
                    Ok(PipelineOutcome::Failed { message })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job: &GenerationJob,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let units = job.request.work_units();
        let total = tracker.total();
        if units.len() as u32 != total {
            return Err(Error::Other(format!(
                "request expands to {} units but the job counts {}",
                units.len(),
                total
            )));
        }

        for (idx, unit) in units.iter().enumerate() {
            let cursor = Cursor {
                job,
                unit,
                index: idx as u32 + 1,
                total,
            };
            tracker.begin_unit(cursor.index);

            match self.run_unit(&cursor, tracker, cancel).await? {
                UnitOutcome::Finished(result, last_step) => {
                    let sub_phase = format!(
                        "item {}/{} [{}] {}",
                        cursor.index,
                        total,
                        unit.language,
                        if result.success { "done" } else { "failed" }
                    );
                    tracker.record(result);
                    let update = tracker.snapshot(last_step.phase(), Some(sub_phase));
                    self.jobs.update_progress(&job.id, &update).await?;
                }
                UnitOutcome::Aborted => return self.abort(job, tracker).await,
            }
        }

        self.finalize(job, tracker).await
    }

    async fn run_unit(
        &self,
        cursor: &Cursor<'_>,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        let job = cursor.job;
        let unit = cursor.unit;
        let retry = &self.retry;

        let fail = |step: Step, err: Error| {
            let classified = classify(&err);
            warn!(
                item_id = %unit.item_id,
                %step,
                kind = %classified.kind,
                severity = %classified.severity,
                "Generation step failed: {}",
                classified.message
            );
            UnitOutcome::Finished(
                ItemResult::failed(
                    &unit.item_id,
                    &unit.language,
                    format!("{step}: {}", classified.message),
                ),
                step,
            )
        };

        // fetch_content
        if !self.enter_step(cursor, Step::FetchContent, tracker, cancel).await? {
            return Ok(UnitOutcome::Aborted);
        }
        let content = self.collaborators.content.as_ref();
        let (source_ref, item_ref) = (job.source_ref.as_str(), unit.item_ref.as_str());
        let content = match with_retry(retry, "fetch_content", move || async move {
            Ok(content.fetch_item_content(source_ref, item_ref).await?)
        })
        .await
        {
            Ok(content) => content,
            Err(e) => return Ok(fail(Step::FetchContent, e)),
        };

        let title = if unit.title == unit.item_ref && !content.title.is_empty() {
            content.title.clone()
        } else {
            unit.title.clone()
        };

        // generate_lyrics
        if !self.enter_step(cursor, Step::GenerateLyrics, tracker, cancel).await? {
            return Ok(UnitOutcome::Aborted);
        }
        let lyrics_request = LyricsRequest {
            item_ref: unit.item_ref.clone(),
            title: title.clone(),
            language: unit.language.clone(),
            source: content.body.clone(),
            style: job.request.style.clone(),
        };
        let provider = self.collaborators.lyrics.as_ref();
        let request = &lyrics_request;
        let lyrics = match with_retry(retry, "generate_lyrics", move || async move {
            Ok(provider.generate_lyrics(request).await?)
        })
        .await
        {
            Ok(lyrics) => lyrics,
            Err(e) => return Ok(fail(Step::GenerateLyrics, e)),
        };

        // generate_artwork: failure is recorded, not fatal
        if !self.enter_step(cursor, Step::GenerateArtwork, tracker, cancel).await? {
            return Ok(UnitOutcome::Aborted);
        }
        let artwork_request = ArtworkRequest {
            item_ref: unit.item_ref.clone(),
            title: title.clone(),
            lyrics: lyrics.text.clone(),
        };
        let provider = self.collaborators.artwork.as_ref();
        let request = &artwork_request;
        let (artwork_url, artwork_error) = match with_retry(retry, "generate_artwork", move || async move {
            Ok(provider.generate_artwork(request).await?)
        })
        .await
        {
            Ok(artwork) => (Some(artwork.url), None),
            Err(e) => {
                let classified = classify(&e);
                warn!(
                    item_id = %unit.item_id,
                    kind = %classified.kind,
                    "Artwork generation failed, linking without artwork"
                );
                (None, Some(classified.message))
            }
        };

        // generate_audio
        if !self.enter_step(cursor, Step::GenerateAudio, tracker, cancel).await? {
            return Ok(UnitOutcome::Aborted);
        }
        let audio_request = AudioRequest {
            item_ref: unit.item_ref.clone(),
            title: title.clone(),
            language: unit.language.clone(),
            lyrics: lyrics.text.clone(),
            style: job.request.style.clone(),
        };
        let provider = self.collaborators.audio.as_ref();
        let request = &audio_request;
        let audio = match with_retry(retry, "generate_audio", move || async move {
            Ok(provider.generate_audio(request).await?)
        })
        .await
        {
            Ok(audio) => audio,
            Err(e) => return Ok(fail(Step::GenerateAudio, e)),
        };

        // persist_and_link
        if !self.enter_step(cursor, Step::PersistAndLink, tracker, cancel).await? {
            return Ok(UnitOutcome::Aborted);
        }
        let item = LinkedItem {
            item_id: unit.item_id.clone(),
            owner_id: job.owner_id.clone(),
            title,
            language: unit.language.clone(),
            visibility: job.target_visibility.clone(),
        };
        let media = GeneratedMedia {
            lyrics: lyrics.text,
            audio_url: audio.url,
            artwork_url,
        };
        let catalog = self.collaborators.catalog.as_ref();
        let (job_id, linked, produced) = (job.id.as_str(), &item, &media);
        let catalog_id = match with_retry(retry, "persist_and_link", move || async move {
            catalog.link_generated_item(job_id, linked, produced).await
        })
        .await
        {
            Ok(id) => id,
            Err(e) => return Ok(fail(Step::PersistAndLink, e)),
        };

        debug!(item_id = %unit.item_id, catalog_id = %catalog_id, "Unit linked");
        Ok(UnitOutcome::Finished(
            ItemResult::succeeded(&unit.item_id, &unit.language, catalog_id)
                .with_artwork_error(artwork_error),
            Step::PersistAndLink,
        ))
    }

    /// Check cancellation, then persist the phase of the step about to run.
    ///
    /// Returns `false` when the job was cancelled.
    async fn enter_step(
        &self,
        cursor: &Cursor<'_>,
        step: Step,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            info!(item_id = %cursor.unit.item_id, %step, "Cancellation observed before step");
            return Ok(false);
        }
        let update = tracker.snapshot(step.phase(), Some(cursor.sub_phase(step)));
        self.jobs.update_progress(&cursor.job.id, &update).await?;
        Ok(true)
    }

    async fn abort(
        &self,
        job: &GenerationJob,
        tracker: &ProgressTracker,
    ) -> Result<PipelineOutcome> {
        let update = tracker.snapshot(JobPhase::Failed, None);
        self.jobs.mark_failed(&job.id, ABORTED_MESSAGE, &update).await?;
        warn!(
            successful = tracker.successful(),
            failed = tracker.failed(),
            "Generation aborted"
        );
        Ok(PipelineOutcome::Aborted)
    }

    async fn finalize(
        &self,
        job: &GenerationJob,
        tracker: &ProgressTracker,
    ) -> Result<PipelineOutcome> {
        let successful = tracker.successful();
        let failed = tracker.failed();

        if successful == 0 {
            let first_error = tracker
                .results()
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "no items produced".to_string());
            let message = format!("all {failed} items failed; first error: {first_error}");
            let update = tracker.snapshot(JobPhase::Failed, None);
            self.jobs.mark_failed(&job.id, &message, &update).await?;
            warn!(failed, "Generation failed");
            return Ok(PipelineOutcome::Failed { message });
        }

        let update = tracker.snapshot(JobPhase::Completed, None);
        self.jobs.mark_completed(&job.id, &update).await?;
        info!(successful, failed, "Generation completed");
        Ok(PipelineOutcome::Completed { successful, failed })
    }
}
