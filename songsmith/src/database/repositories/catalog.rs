//! Catalog track repository.
//!
//! The generation pipeline links each produced unit through
//! [`CatalogLinker`]; `(job_id, item_id)` is the conflict key, so a retried
//! link updates the existing row and returns its id. The link itself is a
//! single statement; the pipeline owns its retry.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::retry::{RetryPolicy, with_retry};
use crate::database::time::now_ms;
use crate::generation::providers::{
    CatalogIntegrity, CatalogLinker, GeneratedMedia, LinkedItem,
};

/// SQLx catalog writer.
pub struct SqlxCatalogRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl SqlxCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_retry_policy(pool, RetryPolicy::default())
    }

    pub fn with_retry_policy(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Number of catalog rows produced by one job.
    pub async fn count_for_job(&self, job_id: &str) -> Result<u64> {
        let pool = &self.pool;
        let count: i64 = with_retry(&self.retry, "count_catalog_for_job", move || async move {
            Ok(
                sqlx::query_scalar("SELECT COUNT(*) FROM catalog_track WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_one(pool)
                    .await?,
            )
        })
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl CatalogLinker for SqlxCatalogRepository {
    async fn link_generated_item(
        &self,
        job_id: &str,
        item: &LinkedItem,
        media: &GeneratedMedia,
    ) -> Result<String> {
        let now = now_ms();
        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO catalog_track (
                id, job_id, item_id, owner_id, title, language,
                lyrics, audio_url, artwork_url, visibility, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (job_id, item_id) DO UPDATE SET
                title = excluded.title,
                language = excluded.language,
                lyrics = excluded.lyrics,
                audio_url = excluded.audio_url,
                artwork_url = excluded.artwork_url,
                visibility = excluded.visibility,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(job_id)
        .bind(&item.item_id)
        .bind(&item.owner_id)
        .bind(&item.title)
        .bind(&item.language)
        .bind(&media.lyrics)
        .bind(&media.audio_url)
        .bind(&media.artwork_url)
        .bind(&item.visibility)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl CatalogIntegrity for SqlxCatalogRepository {
    async fn count_orphaned_links(&self) -> Result<u64> {
        let pool = &self.pool;
        let count: i64 = with_retry(&self.retry, "count_orphaned_links", move || async move {
            Ok(sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM catalog_track c
                WHERE NOT EXISTS (SELECT 1 FROM generation_job j WHERE j.id = c.job_id)
                "#,
            )
            .fetch_one(pool)
            .await?)
        })
        .await?;
        Ok(count.max(0) as u64)
    }
}
