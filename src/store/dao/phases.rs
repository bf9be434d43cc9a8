use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{PhaseState, PhaseStatusRow};

#[derive(Debug, Clone)]
pub(crate) struct PhaseDao {
    pool: PgPool,
}

impl PhaseDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize one (run, phase) row. On conflict, terminal and running
    /// statuses are preserved so a resumed run keeps its history.
    pub(crate) async fn upsert_initial(
        &self,
        run_id: Uuid,
        phase_name: &str,
        status: PhaseState,
        result_data: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pipeline_phase_status (
                pipeline_execution_id, phase_name, status, result_data, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (pipeline_execution_id, phase_name)
            DO UPDATE SET
                status = CASE
                    WHEN pipeline_phase_status.status IN ('completed','running','failed','blocked')
                        THEN pipeline_phase_status.status
                    ELSE EXCLUDED.status
                END,
                updated_at = NOW()
            ",
        )
        .bind(run_id)
        .bind(phase_name)
        .bind(status.as_str())
        .bind(result_data)
        .execute(&self.pool)
        .await
        .context("failed to initialize phase status")?;

        Ok(())
    }

    /// Transition a phase. `started_at` is stamped on entry to running,
    /// `completed_at` on entry to a terminal state.
    pub(crate) async fn set_status(
        &self,
        run_id: Uuid,
        phase_name: &str,
        status: PhaseState,
        result_data: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE pipeline_phase_status
            SET status = $3,
                result_data = COALESCE($4, result_data),
                started_at = CASE WHEN $3 = 'running' THEN NOW() ELSE started_at END,
                completed_at = CASE
                    WHEN $3 IN ('completed', 'failed', 'skipped') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE pipeline_execution_id = $1 AND phase_name = $2
            ",
        )
        .bind(run_id)
        .bind(phase_name)
        .bind(status.as_str())
        .bind(result_data)
        .execute(&self.pool)
        .await
        .context("failed to update phase status")?;

        Ok(())
    }

    pub(crate) async fn get_status(
        &self,
        run_id: Uuid,
        phase_name: &str,
    ) -> Result<Option<PhaseState>> {
        let row = sqlx::query(
            r"
            SELECT status FROM pipeline_phase_status
            WHERE pipeline_execution_id = $1 AND phase_name = $2
            ",
        )
        .bind(run_id)
        .bind(phase_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read phase status")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status").context("failed to get status")?;
        Ok(PhaseState::parse(&status))
    }

    pub(crate) async fn statuses_for_run(&self, run_id: Uuid) -> Result<HashMap<String, PhaseState>> {
        let rows = sqlx::query(
            r"
            SELECT phase_name, status FROM pipeline_phase_status
            WHERE pipeline_execution_id = $1
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to read phase statuses")?;

        let mut statuses = HashMap::new();
        for row in rows {
            let phase: String = row.try_get("phase_name").context("failed to get phase")?;
            let status: String = row.try_get("status").context("failed to get status")?;
            if let Some(parsed) = PhaseState::parse(&status) {
                statuses.insert(phase, parsed);
            }
        }
        Ok(statuses)
    }

    pub(crate) async fn rows_for_run(&self, run_id: Uuid) -> Result<Vec<PhaseStatusRow>> {
        let rows = sqlx::query(
            r"
            SELECT phase_name, status, result_data, started_at, completed_at
            FROM pipeline_phase_status
            WHERE pipeline_execution_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to read phase rows")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status").context("failed to get status")?;
            out.push(PhaseStatusRow {
                phase_name: row.try_get("phase_name").context("failed to get phase")?,
                status: PhaseState::parse(&status)
                    .with_context(|| format!("invalid phase status: {status}"))?,
                result_data: row.try_get("result_data").ok().flatten(),
                started_at: row.try_get("started_at").ok().flatten(),
                completed_at: row.try_get("completed_at").ok().flatten(),
            });
        }
        Ok(out)
    }
}
