use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{ContentAnalysisRecord, ScrapedPage};

#[derive(Debug, Clone)]
pub(crate) struct ContentDao {
    pool: PgPool,
}

impl ContentDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a scraped page by URL. Failed attempts persist a row too, so
    /// the analyzer can tell "failed attempt" from "not attempted".
    pub(crate) async fn upsert_scraped(&self, page: &ScrapedPage, run_id: Uuid) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO scraped_content (
                url, domain, title, content, html, word_count, status,
                error_message, pipeline_execution_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (url)
            DO UPDATE SET
                domain = EXCLUDED.domain,
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                html = EXCLUDED.html,
                word_count = EXCLUDED.word_count,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                pipeline_execution_id = EXCLUDED.pipeline_execution_id,
                updated_at = NOW()
            ",
        )
        .bind(&page.url)
        .bind(&page.domain)
        .bind(&page.title)
        .bind(&page.content)
        .bind(&page.html)
        .bind(page.word_count)
        .bind(page.status.as_str())
        .bind(&page.error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("failed to upsert scraped content")?;

        Ok(())
    }

    /// URLs from the candidate set that already have a scraped row (any run).
    pub(crate) async fn already_scraped(&self, urls: &[String]) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT url FROM scraped_content WHERE url = ANY($1)")
            .bind(urls)
            .fetch_all(&self.pool)
            .await
            .context("failed to check scraped urls")?;

        rows.iter()
            .map(|row| row.try_get("url").context("failed to get url"))
            .collect()
    }

    /// Back-fill the current run id onto rows scraped by earlier runs.
    /// Rows stay shared across runs; this only tags the latest consumer.
    pub(crate) async fn attach_run(&self, urls: &[String], run_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE scraped_content
            SET pipeline_execution_id = $2
            WHERE url = ANY($1)
            ",
        )
        .bind(urls)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("failed to attach run to scraped content")?;

        Ok(result.rows_affected())
    }

    /// Pages scraped for the run that cleared the 100-character quality bar.
    pub(crate) async fn count_scraped_completed(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count FROM scraped_content
            WHERE pipeline_execution_id = $1
              AND status = 'completed'
              AND content IS NOT NULL
              AND LENGTH(content) > 100
            ",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count scraped content")?;

        Ok(row.try_get("count").unwrap_or(0))
    }

    pub(crate) async fn count_analyzed_for_run(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count FROM content_analysis ca
            WHERE EXISTS (
                SELECT 1 FROM scraped_content sc
                WHERE sc.url = ca.url
                  AND sc.pipeline_execution_id = $1
                  AND sc.status = 'completed'
                  AND sc.content IS NOT NULL
                  AND LENGTH(sc.content) > 100
            )
            ",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count analyzed content")?;

        Ok(row.try_get("count").unwrap_or(0))
    }

    /// Scraped-but-unanalyzed pages for the run, capped at `limit`.
    pub(crate) async fn unanalyzed_for_run(
        &self,
        run_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            r"
            SELECT sc.url, sc.domain, sc.content
            FROM scraped_content sc
            LEFT JOIN content_analysis ca ON ca.url = sc.url
            WHERE sc.pipeline_execution_id = $1
              AND sc.status = 'completed'
              AND sc.content IS NOT NULL
              AND LENGTH(sc.content) > 100
              AND ca.id IS NULL
            ORDER BY sc.updated_at ASC
            LIMIT $2
            ",
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch unanalyzed content")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((
                row.try_get("url").context("failed to get url")?,
                row.try_get("domain").unwrap_or_default(),
                row.try_get("content").unwrap_or_default(),
            ));
        }
        Ok(out)
    }

    /// Precondition for running analysis out-of-phase: at least one completed
    /// scrape whose domain has a company profile and no analysis row yet.
    pub(crate) async fn analysis_ready(&self) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count
            FROM scraped_content sc
            JOIN company_profiles cp ON cp.domain = sc.domain
            LEFT JOIN content_analysis ca ON ca.url = sc.url
            WHERE sc.status = 'completed'
              AND sc.content IS NOT NULL
              AND LENGTH(sc.content) > 100
              AND cp.company_name IS NOT NULL
              AND ca.id IS NULL
            LIMIT 1
            ",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to check analysis readiness")?;

        let count: i64 = row.try_get("count").unwrap_or(0);
        Ok(count > 0)
    }

    pub(crate) async fn any_analysis_exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM content_analysis")
            .fetch_one(&self.pool)
            .await
            .context("failed to count content analysis rows")?;

        let count: i64 = row.try_get("count").unwrap_or(0);
        Ok(count > 0)
    }

    /// Store an analysis with its dimension child rows in one transaction.
    pub(crate) async fn insert_analysis(&self, record: &ContentAnalysisRecord) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.context("failed to begin analysis tx")?;

        let row = sqlx::query(
            r"
            INSERT INTO content_analysis (
                id, url, project_id, summary, overall_sentiment, mentions,
                confidence, created_at
            ) VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (url, project_id)
            DO UPDATE SET
                summary = EXCLUDED.summary,
                overall_sentiment = EXCLUDED.overall_sentiment,
                mentions = EXCLUDED.mentions,
                confidence = EXCLUDED.confidence
            RETURNING id
            ",
        )
        .bind(&record.url)
        .bind(record.project_id)
        .bind(&record.summary)
        .bind(&record.overall_sentiment)
        .bind(&record.mentions)
        .bind(record.confidence)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert content analysis")?;

        let analysis_id: Uuid = row.try_get("id").context("failed to get analysis id")?;

        sqlx::query("DELETE FROM dimension_analysis WHERE analysis_id = $1")
            .bind(analysis_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear old dimension rows")?;

        for dimension in &record.dimensions {
            sqlx::query(
                r"
                INSERT INTO dimension_analysis (
                    id, analysis_id, dimension_type, dimension_id, score,
                    evidence_threshold_met, relevant_words, scoring_breakdown
                ) VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(analysis_id)
            .bind(&dimension.dimension_type)
            .bind(&dimension.dimension_id)
            .bind(dimension.score)
            .bind(dimension.evidence_threshold_met)
            .bind(dimension.relevant_words)
            .bind(&dimension.scoring_breakdown)
            .execute(&mut *tx)
            .await
            .context("failed to insert dimension analysis")?;
        }

        tx.commit().await.context("failed to commit analysis tx")?;
        Ok(analysis_id)
    }
}
