use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{PipelineMode, PipelineRun, PipelineStatus, RunCounters};

#[derive(Debug, Clone)]
pub(crate) struct RunDao {
    pool: PgPool,
}

impl RunDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) async fn insert(
        &self,
        id: Uuid,
        client_id: &str,
        mode: PipelineMode,
        config: &Value,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pipeline_executions (id, client_id, mode, status, started_at, config)
            VALUES ($1, $2, $3, 'pending', NOW(), $4)
            ",
        )
        .bind(id)
        .bind(client_id)
        .bind(mode.as_str())
        .bind(config)
        .execute(&self.pool)
        .await
        .context("failed to insert pipeline execution")?;

        Ok(())
    }

    /// Set run status; `completed_at` is written iff the status is terminal.
    pub(crate) async fn set_status(&self, id: Uuid, status: PipelineStatus) -> Result<()> {
        sqlx::query(
            r"
            UPDATE pipeline_executions
            SET status = $2,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("failed to update pipeline status")?;

        Ok(())
    }

    /// Raise aggregate counters. GREATEST keeps them monotonically
    /// non-decreasing even when phases re-report after a resume.
    pub(crate) async fn raise_counters(&self, id: Uuid, counters: &RunCounters) -> Result<()> {
        sqlx::query(
            r"
            UPDATE pipeline_executions
            SET keywords_processed = GREATEST(keywords_processed, $2),
                serp_results_collected = GREATEST(serp_results_collected, $3),
                companies_enriched = GREATEST(companies_enriched, $4),
                videos_enriched = GREATEST(videos_enriched, $5),
                content_analyzed = GREATEST(content_analyzed, $6),
                landscapes_calculated = GREATEST(landscapes_calculated, $7),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(counters.keywords_processed)
        .bind(counters.serp_results_collected)
        .bind(counters.companies_enriched)
        .bind(counters.videos_enriched)
        .bind(counters.content_analyzed)
        .bind(counters.landscapes_calculated)
        .execute(&self.pool)
        .await
        .context("failed to update pipeline counters")?;

        Ok(())
    }

    pub(crate) async fn save_phase_results(
        &self,
        id: Uuid,
        phase_results: &Value,
        errors: &[String],
        warnings: &[String],
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE pipeline_executions
            SET phase_results = $2,
                errors = $3,
                warnings = $4,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(phase_results)
        .bind(errors)
        .bind(warnings)
        .execute(&self.pool)
        .await
        .context("failed to save phase results")?;

        Ok(())
    }

    pub(crate) async fn get(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(
            r"
            SELECT id, client_id, mode, status, started_at, completed_at, config,
                   keywords_processed, serp_results_collected, companies_enriched,
                   videos_enriched, content_analyzed, landscapes_calculated,
                   phase_results, errors, warnings
            FROM pipeline_executions
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load pipeline execution")?;

        row.map(Self::row_to_run).transpose()
    }

    pub(crate) async fn recent(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r"
            SELECT id, client_id, mode, status, started_at, completed_at, config,
                   keywords_processed, serp_results_collected, companies_enriched,
                   videos_enriched, content_analyzed, landscapes_calculated,
                   phase_results, errors, warnings
            FROM pipeline_executions
            ORDER BY started_at DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list recent pipeline executions")?;

        rows.into_iter().map(Self::row_to_run).collect()
    }

    /// Runs left in `running` by a previous process; candidates for resume.
    pub(crate) async fn find_running(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r"
            SELECT id FROM pipeline_executions
            WHERE status = 'running'
            ORDER BY started_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to find running pipelines")?;

        rows.iter()
            .map(|row| row.try_get("id").context("failed to get id"))
            .collect()
    }

    /// Admin-only: wipe run history. Child rows cascade via foreign keys.
    pub(crate) async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pipeline_executions")
            .execute(&self.pool)
            .await
            .context("failed to clear pipeline executions")?;

        Ok(result.rows_affected())
    }

    fn row_to_run(row: sqlx::postgres::PgRow) -> Result<PipelineRun> {
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let mode_str: String = row.try_get("mode").context("failed to get mode")?;
        let started_at: DateTime<Utc> = row
            .try_get("started_at")
            .context("failed to get started_at")?;
        let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at").ok().flatten();

        Ok(PipelineRun {
            id: row.try_get("id").context("failed to get id")?,
            client_id: row.try_get("client_id").unwrap_or_default(),
            mode: PipelineMode::parse(&mode_str).unwrap_or(PipelineMode::Manual),
            status: PipelineStatus::parse(&status_str)
                .with_context(|| format!("invalid pipeline status: {status_str}"))?,
            started_at,
            completed_at,
            config: row.try_get("config").unwrap_or(Value::Null),
            counters: RunCounters {
                keywords_processed: row.try_get("keywords_processed").unwrap_or(0),
                serp_results_collected: row.try_get("serp_results_collected").unwrap_or(0),
                companies_enriched: row.try_get("companies_enriched").unwrap_or(0),
                videos_enriched: row.try_get("videos_enriched").unwrap_or(0),
                content_analyzed: row.try_get("content_analyzed").unwrap_or(0),
                landscapes_calculated: row.try_get("landscapes_calculated").unwrap_or(0),
            },
            phase_results: row.try_get("phase_results").unwrap_or(Value::Null),
            errors: row.try_get("errors").unwrap_or_default(),
            warnings: row.try_get("warnings").unwrap_or_default(),
        })
    }
}
