use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{PhaseProgress, StateItem, StateItemRow, StateStatus};
use crate::util::json::truncate_error;

#[derive(Debug, Clone)]
pub(crate) struct StateDao {
    pool: PgPool,
}

impl StateDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert items that do not already exist for (run, phase). Existing rows
    /// keep their status, so re-initialization is idempotent.
    pub(crate) async fn initialize(
        &self,
        run_id: Uuid,
        phase: &str,
        items: &[StateItem],
    ) -> Result<usize> {
        let mut created = 0;
        for item in items {
            let result = sqlx::query(
                r"
                INSERT INTO pipeline_state (
                    id, pipeline_execution_id, phase, item_type, item_identifier,
                    status, progress_data, created_at, updated_at
                ) VALUES (gen_random_uuid(), $1, $2, $3, $4, 'pending', $5, NOW(), NOW())
                ON CONFLICT (pipeline_execution_id, phase, item_identifier) DO NOTHING
                ",
            )
            .bind(run_id)
            .bind(phase)
            .bind(&item.item_type)
            .bind(&item.item_identifier)
            .bind(&item.progress_data)
            .execute(&self.pool)
            .await
            .context("failed to insert pipeline state item")?;

            created += result.rows_affected() as usize;
        }
        Ok(created)
    }

    /// Pending items ordered by ascending attempt count then age, so fresh
    /// items go first and repeated failures sink.
    pub(crate) async fn get_pending(
        &self,
        run_id: Uuid,
        phase: &str,
        limit: i64,
    ) -> Result<Vec<StateItemRow>> {
        let rows = sqlx::query(
            r"
            SELECT id, item_type, item_identifier, attempt_count, progress_data
            FROM pipeline_state
            WHERE pipeline_execution_id = $1
              AND phase = $2
              AND status = 'pending'
            ORDER BY attempt_count ASC, created_at ASC
            LIMIT $3
            ",
        )
        .bind(run_id)
        .bind(phase)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch pending state items")?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    /// Transition one item. `processing` bumps the attempt counter and stamps
    /// `last_attempt_at`; `completed` stamps `completed_at`. Errors are
    /// truncated to 1000 characters.
    pub(crate) async fn update(
        &self,
        state_id: Uuid,
        status: StateStatus,
        progress_data: Option<&Value>,
        error: Option<&str>,
        error_category: Option<&str>,
    ) -> Result<()> {
        let truncated = error.map(truncate_error);
        sqlx::query(
            r"
            UPDATE pipeline_state
            SET status = $2,
                attempt_count = attempt_count + CASE WHEN $2 = 'processing' THEN 1 ELSE 0 END,
                last_attempt_at = CASE WHEN $2 = 'processing' THEN NOW() ELSE last_attempt_at END,
                completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END,
                progress_data = COALESCE($3, progress_data),
                last_error = COALESCE($4, last_error),
                error_category = COALESCE($5, error_category),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(state_id)
        .bind(status.as_str())
        .bind(progress_data)
        .bind(truncated)
        .bind(error_category)
        .execute(&self.pool)
        .await
        .context("failed to update pipeline state item")?;

        Ok(())
    }

    pub(crate) async fn phase_progress(&self, run_id: Uuid, phase: &str) -> Result<PhaseProgress> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'skipped') AS skipped
            FROM pipeline_state
            WHERE pipeline_execution_id = $1 AND phase = $2
            ",
        )
        .bind(run_id)
        .bind(phase)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate phase progress")?;

        let total: i64 = row.try_get("total").unwrap_or(0);
        let completed: i64 = row.try_get("completed").unwrap_or(0);
        let completion_percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(PhaseProgress {
            total,
            pending: row.try_get("pending").unwrap_or(0),
            processing: row.try_get("processing").unwrap_or(0),
            completed,
            failed: row.try_get("failed").unwrap_or(0),
            skipped: row.try_get("skipped").unwrap_or(0),
            completion_percentage,
        })
    }

    /// Upsert a named checkpoint for (run, phase).
    pub(crate) async fn save_checkpoint(
        &self,
        run_id: Uuid,
        phase: &str,
        checkpoint_name: &str,
        state_data: &Value,
    ) -> Result<()> {
        let progress = self.phase_progress(run_id, phase).await?;

        sqlx::query(
            r"
            INSERT INTO pipeline_checkpoints (
                pipeline_execution_id, phase, checkpoint_name, state_data,
                items_processed, items_total, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (pipeline_execution_id, phase, checkpoint_name)
            DO UPDATE SET
                state_data = EXCLUDED.state_data,
                items_processed = EXCLUDED.items_processed,
                items_total = EXCLUDED.items_total,
                created_at = NOW()
            ",
        )
        .bind(run_id)
        .bind(phase)
        .bind(checkpoint_name)
        .bind(state_data)
        .bind(progress.completed)
        .bind(progress.total)
        .execute(&self.pool)
        .await
        .context("failed to save checkpoint")?;

        Ok(())
    }

    pub(crate) async fn get_checkpoint(
        &self,
        run_id: Uuid,
        phase: &str,
        checkpoint_name: &str,
    ) -> Result<Option<Value>> {
        let row = sqlx::query(
            r"
            SELECT state_data FROM pipeline_checkpoints
            WHERE pipeline_execution_id = $1 AND phase = $2 AND checkpoint_name = $3
            ",
        )
        .bind(run_id)
        .bind(phase)
        .bind(checkpoint_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load checkpoint")?;

        Ok(row.and_then(|r| r.try_get("state_data").ok()))
    }

    /// Bulk transition failed items back to pending with counters cleared.
    pub(crate) async fn reset_failed(
        &self,
        run_id: Uuid,
        phase: Option<&str>,
        max_items: Option<i64>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE pipeline_state
            SET status = 'pending',
                last_error = NULL,
                error_category = NULL,
                attempt_count = 0,
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM pipeline_state
                WHERE pipeline_execution_id = $1
                  AND status = 'failed'
                  AND ($2::text IS NULL OR phase = $2)
                ORDER BY last_attempt_at ASC
                LIMIT COALESCE($3, 2147483647)
            )
            ",
        )
        .bind(run_id)
        .bind(phase)
        .bind(max_items)
        .execute(&self.pool)
        .await
        .context("failed to reset failed state items")?;

        Ok(result.rows_affected())
    }

    fn row_to_item(row: sqlx::postgres::PgRow) -> Result<StateItemRow> {
        Ok(StateItemRow {
            id: row.try_get("id").context("failed to get id")?,
            item_type: row.try_get("item_type").unwrap_or_default(),
            item_identifier: row
                .try_get("item_identifier")
                .context("failed to get item_identifier")?,
            attempt_count: row.try_get("attempt_count").unwrap_or(0),
            progress_data: row.try_get("progress_data").unwrap_or(Value::Null),
        })
    }
}
