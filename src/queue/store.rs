use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::types::{Job, JobStatus, NewJob, QueueStats};
use crate::util::json::truncate_error;

#[derive(Debug, Clone)]
pub(crate) struct QueueStore {
    pool: PgPool,
    queue_name: String,
    lock_timeout_seconds: i64,
}

impl QueueStore {
    pub(crate) fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
            lock_timeout_seconds: 300,
        }
    }

    pub(crate) fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub(crate) async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r"
            INSERT INTO job_queue (
                id, queue_name, job_type, payload, priority,
                scheduled_for, max_attempts
            ) VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'), $7)
            ",
        )
        .bind(id)
        .bind(&self.queue_name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.delay_seconds)
        .bind(job.max_attempts)
        .execute(&self.pool)
        .await
        .context("failed to enqueue job")?;

        Ok(id)
    }

    /// Acquire the next available job. One atomic statement: expired leases
    /// are released first, then the highest-priority runnable row is locked
    /// with SKIP LOCKED so parallel workers never contend on the same job,
    /// and the attempt counter is bumped as part of taking the lease.
    pub(crate) async fn acquire(&self, worker_id: &str) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await.context("failed to begin acquire tx")?;

        sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'pending', locked_at = NULL, locked_by = NULL
            WHERE queue_name = $1
              AND status = 'processing'
              AND locked_at < NOW() - ($2 * INTERVAL '1 second')
            ",
        )
        .bind(&self.queue_name)
        .bind(self.lock_timeout_seconds)
        .execute(&mut *tx)
        .await
        .context("failed to release expired leases")?;

        let row = sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'processing',
                locked_at = NOW(),
                locked_by = $2,
                started_at = COALESCE(started_at, NOW()),
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM job_queue
                WHERE queue_name = $1
                  AND status = 'pending'
                  AND NOT dead_letter
                  AND scheduled_for <= NOW()
                ORDER BY priority DESC, scheduled_for ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue_name, job_type, payload, priority, status,
                      attempts, max_attempts, scheduled_for, locked_by, last_error
            ",
        )
        .bind(&self.queue_name)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to acquire job")?;

        tx.commit().await.context("failed to commit acquire tx")?;

        row.map(Self::row_to_job).transpose()
    }

    pub(crate) async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'completed',
                completed_at = NOW(),
                locked_at = NULL,
                locked_by = NULL
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("failed to complete job")?;

        Ok(())
    }

    /// Fail a job. Exhausted jobs enter the dead letter queue; otherwise the
    /// job is rescheduled with exponential backoff (base * 2^(attempts-1)),
    /// capped at one hour.
    pub(crate) async fn fail(&self, job_id: Uuid, error: &str) -> Result<JobStatus> {
        let row = sqlx::query(
            r"
            UPDATE job_queue
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                failed_at = CASE WHEN attempts >= max_attempts THEN NOW() ELSE NULL END,
                dead_letter = attempts >= max_attempts,
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL,
                scheduled_for = CASE
                    WHEN attempts < max_attempts
                        THEN NOW() + (LEAST(POWER(2, attempts - 1), 3600) * INTERVAL '1 second')
                    ELSE scheduled_for
                END
            WHERE id = $1
            RETURNING status
            ",
        )
        .bind(job_id)
        .bind(truncate_error(error))
        .fetch_one(&self.pool)
        .await
        .context("failed to mark job failed")?;

        let status: String = row.try_get("status").context("failed to get status")?;
        Ok(JobStatus::parse(&status).unwrap_or(JobStatus::Failed))
    }

    pub(crate) async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing_count,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_count,
                COUNT(*) FILTER (WHERE dead_letter) AS dead_letter_count,
                (AVG(EXTRACT(EPOCH FROM (completed_at - started_at)))
                    FILTER (WHERE completed_at IS NOT NULL))::float AS avg_processing_time_seconds
            FROM job_queue
            WHERE queue_name = $1
            ",
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate queue stats")?;

        Ok(QueueStats {
            pending_count: row.try_get("pending_count").unwrap_or(0),
            processing_count: row.try_get("processing_count").unwrap_or(0),
            completed_count: row.try_get("completed_count").unwrap_or(0),
            failed_count: row.try_get("failed_count").unwrap_or(0),
            dead_letter_count: row.try_get("dead_letter_count").unwrap_or(0),
            avg_processing_time_seconds: row
                .try_get("avg_processing_time_seconds")
                .ok()
                .flatten(),
        })
    }

    /// Requeue dead-letter jobs with a fresh retry budget.
    pub(crate) async fn retry_dead_letter(&self, job_ids: Option<&[Uuid]>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'pending',
                dead_letter = FALSE,
                attempts = 0,
                scheduled_for = NOW(),
                last_error = NULL,
                failed_at = NULL
            WHERE queue_name = $1
              AND dead_letter
              AND ($2::uuid[] IS NULL OR id = ANY($2))
            ",
        )
        .bind(&self.queue_name)
        .bind(job_ids)
        .execute(&self.pool)
        .await
        .context("failed to retry dead letter jobs")?;

        Ok(result.rows_affected())
    }

    fn row_to_job(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.try_get("status").context("failed to get status")?;
        Ok(Job {
            id: row.try_get("id").context("failed to get id")?,
            queue_name: row.try_get("queue_name").context("failed to get queue")?,
            job_type: row.try_get("job_type").context("failed to get job_type")?,
            payload: row.try_get("payload").unwrap_or(Value::Null),
            priority: row.try_get("priority").unwrap_or(0),
            status: JobStatus::parse(&status)
                .with_context(|| format!("invalid job status: {status}"))?,
            attempts: row.try_get("attempts").unwrap_or(0),
            max_attempts: row.try_get("max_attempts").unwrap_or(3),
            scheduled_for: row
                .try_get("scheduled_for")
                .context("failed to get scheduled_for")?,
            locked_by: row.try_get("locked_by").ok().flatten(),
            last_error: row.try_get("last_error").ok().flatten(),
        })
    }
}
