//! Generation job models.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::generation::request::GenerationRequest;
use crate::{Error, Result};

/// Generation job database row.
///
/// List-valued fields are JSON TEXT columns; timestamps are epoch millis.
#[derive(Debug, Clone, FromRow)]
pub struct GenerationJobDbModel {
    pub id: String,
    pub owner_id: String,
    /// single-item | multi-item
    pub kind: String,
    /// queued | processing | completed | failed
    pub status: String,
    pub phase: String,
    pub sub_phase: Option<String>,
    pub total_items: i64,
    pub current_item: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub percent_complete: i64,
    /// single | all
    pub language_mode: String,
    pub generated_languages: String,
    pub failed_languages: String,
    pub item_results: String,
    pub error_message: Option<String>,
    pub source_ref: String,
    /// JSON-encoded [`GenerationRequest`]
    pub request: String,
    pub target_visibility: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// Job kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    SingleItem,
    MultiItem,
}

/// Coarse job status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet picked up.
    Queued,
    /// Pipeline is running.
    Processing,
    /// At least one item succeeded.
    Completed,
    /// No item succeeded, the job was aborted, or it was orphaned by a restart.
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Fine-grained pipeline phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    FetchingContent,
    GeneratingLyrics,
    GeneratingArtwork,
    GeneratingAudio,
    Linking,
    Completed,
    Failed,
}

/// Language fan-out mode.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LanguageMode {
    #[default]
    Single,
    All,
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_entity_id: Option<String>,
    /// Artwork failures do not fail the item; they are surfaced here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_error: Option<String>,
}

impl ItemResult {
    pub fn succeeded(
        item_id: impl Into<String>,
        language: impl Into<String>,
        produced_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            language: Some(language.into()),
            error: None,
            produced_entity_id: Some(produced_entity_id.into()),
            artwork_error: None,
        }
    }

    pub fn failed(
        item_id: impl Into<String>,
        language: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            language: Some(language.into()),
            error: Some(error.into()),
            produced_entity_id: None,
            artwork_error: None,
        }
    }

    pub fn with_artwork_error(mut self, error: Option<String>) -> Self {
        self.artwork_error = error;
        self
    }
}

/// Partial update applied by `update_progress`.
///
/// `None` fields are left untouched. List fields replace the stored value
/// wholesale; the pipeline owns accumulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<JobPhase>,
    pub sub_phase: Option<String>,
    pub current_item: Option<u32>,
    pub successful_items: Option<u32>,
    pub failed_items: Option<u32>,
    pub percent_complete: Option<u8>,
    pub item_results: Option<Vec<ItemResult>>,
    pub generated_languages: Option<BTreeSet<String>>,
    pub failed_languages: Option<BTreeSet<String>>,
}

impl ProgressUpdate {
    pub fn phase(phase: JobPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }
}

/// Polling snapshot of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub owner_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub sub_phase: Option<String>,
    pub total_items: u32,
    pub current_item: u32,
    pub successful_items: u32,
    pub failed_items: u32,
    pub percent_complete: u8,
    pub language_mode: LanguageMode,
    pub generated_languages: BTreeSet<String>,
    pub failed_languages: BTreeSet<String>,
    pub item_results: Vec<ItemResult>,
    pub error_message: Option<String>,
    pub source_ref: String,
    pub request: GenerationRequest,
    pub target_visibility: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    /// A freshly accepted job for an already-normalized request.
    pub fn new_queued(owner_id: impl Into<String>, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            kind: request.kind,
            status: JobStatus::Queued,
            phase: JobPhase::Queued,
            sub_phase: None,
            total_items: request.unit_count(),
            current_item: 0,
            successful_items: 0,
            failed_items: 0,
            percent_complete: 0,
            language_mode: request.language_mode,
            generated_languages: BTreeSet::new(),
            failed_languages: BTreeSet::new(),
            item_results: Vec::new(),
            error_message: None,
            source_ref: request.source_ref.clone(),
            target_visibility: request.target_visibility.clone(),
            request,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn to_db_model(&self) -> Result<GenerationJobDbModel> {
        Ok(GenerationJobDbModel {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            kind: self.kind.to_string(),
            status: self.status.to_string(),
            phase: self.phase.to_string(),
            sub_phase: self.sub_phase.clone(),
            total_items: self.total_items as i64,
            current_item: self.current_item as i64,
            successful_items: self.successful_items as i64,
            failed_items: self.failed_items as i64,
            percent_complete: self.percent_complete as i64,
            language_mode: self.language_mode.to_string(),
            generated_languages: serde_json::to_string(&self.generated_languages)?,
            failed_languages: serde_json::to_string(&self.failed_languages)?,
            item_results: serde_json::to_string(&self.item_results)?,
            error_message: self.error_message.clone(),
            source_ref: self.source_ref.clone(),
            request: serde_json::to_string(&self.request)?,
            target_visibility: self.target_visibility.clone(),
            created_at: self.created_at.timestamp_millis(),
            started_at: self.started_at.map(|t| t.timestamp_millis()),
            completed_at: self.completed_at.map(|t| t.timestamp_millis()),
            updated_at: now_ms(),
        })
    }
}

fn parse_column<T: std::str::FromStr>(job_id: &str, column: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        Error::Database(format!(
            "generation_job {job_id}: invalid {column} value '{value}'"
        ))
    })
}

fn count(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

impl TryFrom<GenerationJobDbModel> for GenerationJob {
    type Error = Error;

    fn try_from(row: GenerationJobDbModel) -> Result<Self> {
        Ok(Self {
            kind: parse_column(&row.id, "kind", &row.kind)?,
            phase: parse_column(&row.id, "phase", &row.phase)?,
            language_mode: parse_column(&row.id, "language_mode", &row.language_mode)?,
            status: parse_column(&row.id, "status", &row.status)?,
            sub_phase: row.sub_phase,
            total_items: count(row.total_items),
            current_item: count(row.current_item),
            successful_items: count(row.successful_items),
            failed_items: count(row.failed_items),
            percent_complete: row.percent_complete.clamp(0, 100) as u8,
            generated_languages: serde_json::from_str(&row.generated_languages)?,
            failed_languages: serde_json::from_str(&row.failed_languages)?,
            item_results: serde_json::from_str(&row.item_results)?,
            error_message: row.error_message,
            source_ref: row.source_ref,
            request: serde_json::from_str(&row.request)?,
            target_visibility: row.target_visibility,
            created_at: ms_to_datetime(row.created_at),
            started_at: row.started_at.map(ms_to_datetime),
            completed_at: row.completed_at.map(ms_to_datetime),
            updated_at: ms_to_datetime(row.updated_at),
            id: row.id,
            owner_id: row.owner_id,
        })
    }
}
