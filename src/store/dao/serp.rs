use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::SerpRecord;

#[derive(Debug, Clone)]
pub(crate) struct SerpDao {
    pool: PgPool,
}

impl SerpDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert one result on the natural key
    /// (keyword_id, search_date, location, serp_type, url).
    ///
    /// Rows are shared across runs; `pipeline_execution_id` is back-filled to
    /// the most recent run that wrote the row rather than isolating runs.
    pub(crate) async fn upsert_result(&self, record: &SerpRecord, run_id: Uuid) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO serp_results (
                keyword_id, search_date, location, serp_type, position, url,
                title, snippet, domain, source, published_date, video_length,
                total_results, device, pipeline_execution_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW())
            ON CONFLICT (keyword_id, search_date, location, serp_type, url)
            DO UPDATE SET
                position = EXCLUDED.position,
                title = EXCLUDED.title,
                snippet = EXCLUDED.snippet,
                source = EXCLUDED.source,
                published_date = EXCLUDED.published_date,
                video_length = EXCLUDED.video_length,
                total_results = EXCLUDED.total_results,
                device = EXCLUDED.device,
                pipeline_execution_id = EXCLUDED.pipeline_execution_id
            ",
        )
        .bind(record.keyword_id)
        .bind(record.search_date)
        .bind(&record.location)
        .bind(record.kind.as_str())
        .bind(record.position)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.snippet)
        .bind(&record.domain)
        .bind(&record.source)
        .bind(record.published_date)
        .bind(&record.video_length)
        .bind(record.total_results)
        .bind(&record.device)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("failed to upsert serp result")?;

        Ok(())
    }

    pub(crate) async fn count_for_run(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM serp_results WHERE pipeline_execution_id = $1",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count serp results")?;

        Ok(row.try_get("count").unwrap_or(0))
    }

    pub(crate) async fn count_videos_for_run(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count FROM serp_results
            WHERE pipeline_execution_id = $1 AND serp_type = 'video'
            ",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count video serp results")?;

        Ok(row.try_get("count").unwrap_or(0))
    }

    pub(crate) async fn distinct_domains_for_run(&self, run_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT domain FROM serp_results
            WHERE pipeline_execution_id = $1 AND domain IS NOT NULL AND domain <> ''
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch serp domains")?;

        rows.iter()
            .map(|row| row.try_get("domain").context("failed to get domain"))
            .collect()
    }

    pub(crate) async fn video_urls_for_run(&self, run_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT url FROM serp_results
            WHERE pipeline_execution_id = $1 AND serp_type = 'video'
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch video urls")?;

        rows.iter()
            .map(|row| row.try_get("url").context("failed to get url"))
            .collect()
    }

    /// URLs eligible for scraping: organic and news results only.
    pub(crate) async fn content_urls_for_run(&self, run_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT url FROM serp_results
            WHERE pipeline_execution_id = $1 AND serp_type IN ('organic', 'news')
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch content urls")?;

        rows.iter()
            .map(|row| row.try_get("url").context("failed to get url"))
            .collect()
    }

    /// Re-key a prior run's results to a new run without calling the
    /// provider. Returns the number of rows now attached to `target_run`.
    pub(crate) async fn copy_from_run(&self, source_run: Uuid, target_run: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE serp_results
            SET pipeline_execution_id = $2
            WHERE pipeline_execution_id = $1
            ",
        )
        .bind(source_run)
        .bind(target_run)
        .execute(&self.pool)
        .await
        .context("failed to copy serp results between runs")?;

        Ok(result.rows_affected())
    }

    pub(crate) async fn keywords_processed_for_run(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(DISTINCT keyword_id) AS count FROM serp_results
            WHERE pipeline_execution_id = $1
            ",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count processed keywords")?;

        Ok(row.try_get("count").unwrap_or(0))
    }
}
