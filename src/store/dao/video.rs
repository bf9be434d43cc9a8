use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::{ChannelCompany, VideoSnapshot};

#[derive(Debug, Clone)]
pub(crate) struct VideoDao {
    pool: PgPool,
}

impl VideoDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) async fn upsert_snapshot(&self, snapshot: &VideoSnapshot) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO video_snapshots (
                snapshot_date, video_id, video_url, video_title, channel_id,
                channel_title, published_at, view_count, like_count,
                comment_count, subscriber_count, engagement_rate,
                duration_seconds, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (video_id, snapshot_date)
            DO UPDATE SET
                video_title = EXCLUDED.video_title,
                channel_title = EXCLUDED.channel_title,
                view_count = EXCLUDED.view_count,
                like_count = EXCLUDED.like_count,
                comment_count = EXCLUDED.comment_count,
                subscriber_count = EXCLUDED.subscriber_count,
                engagement_rate = EXCLUDED.engagement_rate,
                duration_seconds = EXCLUDED.duration_seconds
            ",
        )
        .bind(snapshot.snapshot_date)
        .bind(&snapshot.video_id)
        .bind(&snapshot.video_url)
        .bind(&snapshot.video_title)
        .bind(&snapshot.channel_id)
        .bind(&snapshot.channel_title)
        .bind(snapshot.published_at)
        .bind(snapshot.view_count)
        .bind(snapshot.like_count)
        .bind(snapshot.comment_count)
        .bind(snapshot.subscriber_count)
        .bind(snapshot.engagement_rate)
        .bind(snapshot.duration_seconds)
        .execute(&self.pool)
        .await
        .context("failed to upsert video snapshot")?;

        Ok(())
    }

    /// Most recent snapshot for a video, used when quota is exhausted.
    pub(crate) async fn latest_snapshot(&self, video_id: &str) -> Result<Option<VideoSnapshot>> {
        let row = sqlx::query(
            r"
            SELECT snapshot_date, video_id, video_url, video_title, channel_id,
                   channel_title, published_at, view_count, like_count,
                   comment_count, subscriber_count, engagement_rate, duration_seconds
            FROM video_snapshots
            WHERE video_id = $1
            ORDER BY snapshot_date DESC
            LIMIT 1
            ",
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load cached video snapshot")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(VideoSnapshot {
            snapshot_date: row
                .try_get("snapshot_date")
                .context("failed to get snapshot_date")?,
            video_id: row.try_get("video_id").context("failed to get video_id")?,
            video_url: row.try_get("video_url").unwrap_or_default(),
            video_title: row.try_get("video_title").unwrap_or_default(),
            channel_id: row.try_get("channel_id").unwrap_or_default(),
            channel_title: row.try_get("channel_title").unwrap_or_default(),
            published_at: row.try_get("published_at").ok().flatten(),
            view_count: row.try_get("view_count").unwrap_or(0),
            like_count: row.try_get("like_count").unwrap_or(0),
            comment_count: row.try_get("comment_count").unwrap_or(0),
            subscriber_count: row.try_get("subscriber_count").unwrap_or(0),
            engagement_rate: row.try_get("engagement_rate").unwrap_or(0.0),
            duration_seconds: row.try_get("duration_seconds").unwrap_or(0),
        }))
    }

    /// Distinct channels referenced by the run's video results.
    pub(crate) async fn channels_for_run(&self, run_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT vs.channel_id
            FROM video_snapshots vs
            INNER JOIN serp_results sr ON sr.url = vs.video_url
            WHERE sr.pipeline_execution_id = $1
              AND vs.channel_id IS NOT NULL AND vs.channel_id <> ''
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch channels for run")?;

        rows.iter()
            .map(|row| row.try_get("channel_id").context("failed to get channel_id"))
            .collect()
    }

    /// Channels for the run that already resolve to a company domain.
    pub(crate) async fn resolved_channels_for_run(&self, run_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(DISTINCT cc.channel_id) AS count
            FROM channel_companies cc
            WHERE cc.channel_id IN (
                SELECT DISTINCT vs.channel_id
                FROM video_snapshots vs
                INNER JOIN serp_results sr ON sr.url = vs.video_url
                WHERE sr.pipeline_execution_id = $1
                  AND vs.channel_id IS NOT NULL AND vs.channel_id <> ''
            )
            AND COALESCE(cc.company_domain, '') <> ''
            ",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count resolved channels")?;

        Ok(row.try_get("count").unwrap_or(0))
    }

    pub(crate) async fn get_channel_company(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelCompany>> {
        let row = sqlx::query(
            r"
            SELECT channel_id, company_name, company_domain, channel_type,
                   confidence, reasoning
            FROM channel_companies
            WHERE channel_id = $1
            ",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load channel company mapping")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ChannelCompany {
            channel_id: row.try_get("channel_id").context("failed to get channel_id")?,
            company_name: row.try_get("company_name").ok().flatten(),
            company_domain: row.try_get("company_domain").ok().flatten(),
            channel_type: row.try_get("channel_type").ok().flatten(),
            confidence: row.try_get("confidence").unwrap_or(0.0),
            reasoning: row.try_get("reasoning").ok().flatten(),
        }))
    }

    pub(crate) async fn upsert_channel_company(&self, mapping: &ChannelCompany) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO channel_companies (
                channel_id, company_name, company_domain, channel_type,
                confidence, reasoning, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (channel_id)
            DO UPDATE SET
                company_name = EXCLUDED.company_name,
                company_domain = EXCLUDED.company_domain,
                channel_type = EXCLUDED.channel_type,
                confidence = EXCLUDED.confidence,
                reasoning = EXCLUDED.reasoning,
                updated_at = NOW()
            ",
        )
        .bind(&mapping.channel_id)
        .bind(&mapping.company_name)
        .bind(&mapping.company_domain)
        .bind(&mapping.channel_type)
        .bind(mapping.confidence)
        .bind(&mapping.reasoning)
        .execute(&self.pool)
        .await
        .context("failed to upsert channel company mapping")?;

        Ok(())
    }
}
