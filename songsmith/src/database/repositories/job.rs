//! Generation job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{GenerationJob, GenerationJobDbModel, JobStatus, ProgressUpdate};
use crate::database::retry::{RetryPolicy, with_retry};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Generation job repository trait.
///
/// The pipeline is the only writer of a running job, so writes are
/// last-writer-wins per id. Status writes only move forward; a write that
/// would leave a terminal state is rejected with
/// [`Error::InvalidStateTransition`].
#[async_trait]
pub trait GenerationJobRepository: Send + Sync {
    async fn create_job(&self, job: &GenerationJob) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>>;
    async fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GenerationJob>>;

    /// `queued -> processing`, stamping `started_at`.
    async fn mark_started(&self, id: &str) -> Result<()>;

    /// Merge a partial update into a processing job.
    ///
    /// Counters and percent never decrease; list fields are replaced wholesale.
    async fn update_progress(&self, id: &str, update: &ProgressUpdate) -> Result<()>;

    /// Finalize as `completed` with percent 100.
    async fn mark_completed(&self, id: &str, update: &ProgressUpdate) -> Result<()>;

    /// Finalize as `failed` from `queued` or `processing`.
    async fn mark_failed(&self, id: &str, message: &str, update: &ProgressUpdate) -> Result<()>;

    /// Queued or processing jobs of one owner.
    async fn find_all_active(&self, owner_id: &str) -> Result<Vec<GenerationJob>>;

    /// Queued or processing jobs created before `cutoff_ms`.
    async fn find_stale_before(&self, cutoff_ms: i64) -> Result<Vec<GenerationJob>>;
    async fn count_stale_before(&self, cutoff_ms: i64) -> Result<u64>;
}

/// SQLx implementation of [`GenerationJobRepository`].
pub struct SqlxGenerationJobRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

struct EncodedUpdate {
    phase: Option<String>,
    item_results: Option<String>,
    generated_languages: Option<String>,
    failed_languages: Option<String>,
}

impl EncodedUpdate {
    fn encode(update: &ProgressUpdate) -> Result<Self> {
        Ok(Self {
            phase: update.phase.map(|p| p.to_string()),
            item_results: update
                .item_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            generated_languages: update
                .generated_languages
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            failed_languages: update
                .failed_languages
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

const ACTIVE_STATUSES: &str = "('queued', 'processing')";

impl SqlxGenerationJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_retry_policy(pool, RetryPolicy::default())
    }

    pub fn with_retry_policy(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    async fn fetch_many(&self, op: &str, sql: &str, binds: &[&str]) -> Result<Vec<GenerationJob>> {
        let pool = &self.pool;
        let rows = with_retry(&self.retry, op, move || async move {
            let mut query = sqlx::query_as::<_, GenerationJobDbModel>(sql);
            for value in binds {
                query = query.bind(*value);
            }
            Ok(query.fetch_all(pool).await?)
        })
        .await?;
        rows.into_iter().map(GenerationJob::try_from).collect()
    }

    /// Explain why a guarded write touched no rows.
    async fn rejected_write(&self, id: &str, target: JobStatus) -> Error {
        let pool = &self.pool;
        let current = with_retry(&self.retry, "load_job_status", move || async move {
            let status: Option<(String,)> =
                sqlx::query_as("SELECT status FROM generation_job WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            Ok(status)
        })
        .await;

        match current {
            Ok(Some((from,))) => Error::invalid_transition(from, target.to_string()),
            Ok(None) => Error::not_found("GenerationJob", id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl GenerationJobRepository for SqlxGenerationJobRepository {
    async fn create_job(&self, job: &GenerationJob) -> Result<()> {
        let row = job.to_db_model()?;
        let pool = &self.pool;
        let row = &row;
        with_retry(&self.retry, "create_job", move || async move {
            sqlx::query(
                r#"
                INSERT INTO generation_job (
                    id, owner_id, kind, status, phase, sub_phase,
                    total_items, current_item, successful_items, failed_items, percent_complete,
                    language_mode, generated_languages, failed_languages, item_results,
                    error_message, source_ref, request, target_visibility,
                    created_at, started_at, completed_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(&row.owner_id)
            .bind(&row.kind)
            .bind(&row.status)
            .bind(&row.phase)
            .bind(&row.sub_phase)
            .bind(row.total_items)
            .bind(row.current_item)
            .bind(row.successful_items)
            .bind(row.failed_items)
            .bind(row.percent_complete)
            .bind(&row.language_mode)
            .bind(&row.generated_languages)
            .bind(&row.failed_languages)
            .bind(&row.item_results)
            .bind(&row.error_message)
            .bind(&row.source_ref)
            .bind(&row.request)
            .bind(&row.target_visibility)
            .bind(row.created_at)
            .bind(row.started_at)
            .bind(row.completed_at)
            .bind(row.updated_at)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>> {
        let pool = &self.pool;
        let row = with_retry(&self.retry, "get_job", move || async move {
            Ok(
                sqlx::query_as::<_, GenerationJobDbModel>(
                    "SELECT * FROM generation_job WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(pool)
                .await?,
            )
        })
        .await?;
        row.map(GenerationJob::try_from).transpose()
    }

    async fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GenerationJob>> {
        let pool = &self.pool;
        let rows = with_retry(&self.retry, "list_jobs_for_owner", move || async move {
            Ok(sqlx::query_as::<_, GenerationJobDbModel>(
                r#"
                SELECT * FROM generation_job
                WHERE owner_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(owner_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(pool)
            .await?)
        })
        .await?;
        rows.into_iter().map(GenerationJob::try_from).collect()
    }

    async fn mark_started(&self, id: &str) -> Result<()> {
        let pool = &self.pool;
        let affected = with_retry(&self.retry, "mark_started", move || async move {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE generation_job SET
                    status = 'processing',
                    phase = 'fetching_content',
                    started_at = ?,
                    updated_at = ?
                WHERE id = ? AND status = 'queued'
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(self.rejected_write(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn update_progress(&self, id: &str, update: &ProgressUpdate) -> Result<()> {
        let encoded = EncodedUpdate::encode(update)?;
        let pool = &self.pool;
        let (encoded, update) = (&encoded, update);
        let affected = with_retry(&self.retry, "update_progress", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE generation_job SET
                    phase = COALESCE(?, phase),
                    sub_phase = COALESCE(?, sub_phase),
                    current_item = MAX(current_item, MIN(total_items, COALESCE(?, current_item))),
                    successful_items = MAX(successful_items, COALESCE(?, successful_items)),
                    failed_items = MAX(failed_items, COALESCE(?, failed_items)),
                    percent_complete = MAX(percent_complete, MIN(100, COALESCE(?, percent_complete))),
                    item_results = COALESCE(?, item_results),
                    generated_languages = COALESCE(?, generated_languages),
                    failed_languages = COALESCE(?, failed_languages),
                    updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(&encoded.phase)
            .bind(&update.sub_phase)
            .bind(update.current_item.map(i64::from))
            .bind(update.successful_items.map(i64::from))
            .bind(update.failed_items.map(i64::from))
            .bind(update.percent_complete.map(i64::from))
            .bind(&encoded.item_results)
            .bind(&encoded.generated_languages)
            .bind(&encoded.failed_languages)
            .bind(now_ms())
            .bind(id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(self.rejected_write(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn mark_completed(&self, id: &str, update: &ProgressUpdate) -> Result<()> {
        let encoded = EncodedUpdate::encode(update)?;
        let pool = &self.pool;
        let (encoded, update) = (&encoded, update);
        let affected = with_retry(&self.retry, "mark_completed", move || async move {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE generation_job SET
                    status = 'completed',
                    phase = 'completed',
                    sub_phase = COALESCE(?, sub_phase),
                    current_item = MAX(current_item, MIN(total_items, COALESCE(?, current_item))),
                    successful_items = MAX(successful_items, COALESCE(?, successful_items)),
                    failed_items = MAX(failed_items, COALESCE(?, failed_items)),
                    percent_complete = 100,
                    item_results = COALESCE(?, item_results),
                    generated_languages = COALESCE(?, generated_languages),
                    failed_languages = COALESCE(?, failed_languages),
                    completed_at = ?,
                    updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(&update.sub_phase)
            .bind(update.current_item.map(i64::from))
            .bind(update.successful_items.map(i64::from))
            .bind(update.failed_items.map(i64::from))
            .bind(&encoded.item_results)
            .bind(&encoded.generated_languages)
            .bind(&encoded.failed_languages)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(self.rejected_write(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, message: &str, update: &ProgressUpdate) -> Result<()> {
        let encoded = EncodedUpdate::encode(update)?;
        let pool = &self.pool;
        let (encoded, update) = (&encoded, update);
        let affected = with_retry(&self.retry, "mark_failed", move || async move {
            let now = now_ms();
            let result = sqlx::query(&format!(
                r#"
                UPDATE generation_job SET
                    status = 'failed',
                    phase = 'failed',
                    sub_phase = COALESCE(?, sub_phase),
                    error_message = ?,
                    current_item = MAX(current_item, MIN(total_items, COALESCE(?, current_item))),
                    successful_items = MAX(successful_items, COALESCE(?, successful_items)),
                    failed_items = MAX(failed_items, COALESCE(?, failed_items)),
                    percent_complete = MAX(percent_complete, MIN(100, COALESCE(?, percent_complete))),
                    item_results = COALESCE(?, item_results),
                    generated_languages = COALESCE(?, generated_languages),
                    failed_languages = COALESCE(?, failed_languages),
                    completed_at = ?,
                    updated_at = ?
                WHERE id = ? AND status IN {ACTIVE_STATUSES}
                "#
            ))
            .bind(&update.sub_phase)
            .bind(message)
            .bind(update.current_item.map(i64::from))
            .bind(update.successful_items.map(i64::from))
            .bind(update.failed_items.map(i64::from))
            .bind(update.percent_complete.map(i64::from))
            .bind(&encoded.item_results)
            .bind(&encoded.generated_languages)
            .bind(&encoded.failed_languages)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(self.rejected_write(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn find_all_active(&self, owner_id: &str) -> Result<Vec<GenerationJob>> {
        let sql = format!(
            "SELECT * FROM generation_job WHERE owner_id = ? AND status IN {ACTIVE_STATUSES} \
             ORDER BY created_at"
        );
        self.fetch_many("find_all_active", &sql, &[owner_id]).await
    }

    async fn find_stale_before(&self, cutoff_ms: i64) -> Result<Vec<GenerationJob>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT * FROM generation_job WHERE status IN {ACTIVE_STATUSES} AND created_at < ? \
             ORDER BY created_at"
        );
        let sql = sql.as_str();
        let rows = with_retry(&self.retry, "find_stale_before", move || async move {
            Ok(sqlx::query_as::<_, GenerationJobDbModel>(sql)
                .bind(cutoff_ms)
                .fetch_all(pool)
                .await?)
        })
        .await?;
        rows.into_iter().map(GenerationJob::try_from).collect()
    }

    async fn count_stale_before(&self, cutoff_ms: i64) -> Result<u64> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT COUNT(*) FROM generation_job WHERE status IN {ACTIVE_STATUSES} AND created_at < ?"
        );
        let sql = sql.as_str();
        let count: i64 = with_retry(&self.retry, "count_stale_before", move || async move {
            Ok(sqlx::query_scalar(sql).bind(cutoff_ms).fetch_one(pool).await?)
        })
        .await?;
        Ok(count.max(0) as u64)
    }
}
