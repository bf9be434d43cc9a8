/// Digital Share of Influence calculator.
///
/// Four ranking families per run: company-level organic, page-level
/// (organic, news, video), news publisher, and video company. Scoring is
/// SQL-driven over the run's stored rows; stored `dsi_score` values are
/// normalized to [0,1] (percentage product divided by 100) with raw
/// percentages kept in metadata. Upserts take the GREATEST of old and new so
/// a domain appearing in several channels keeps its best score.
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::dsi::ctr::CTR_CASE_SQL;

#[derive(Debug, Clone, Default)]
pub(crate) struct DsiOutcome {
    pub(crate) companies_ranked: usize,
    pub(crate) pages_ranked: usize,
    pub(crate) skipped: bool,
    pub(crate) skip_reasons: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompanyDsiRow {
    company_name: String,
    domain: String,
    keyword_count: i64,
    page_count: i64,
    avg_position: f64,
    top_10_count: i64,
    total_estimated_traffic: f64,
    persona_score: f64,
    keyword_coverage_pct: f64,
    traffic_share_pct: f64,
    dsi_pct: f64,
}

#[derive(Debug, Clone)]
struct PageDsiRow {
    url: String,
    domain: String,
    title: Option<String>,
    keyword_count: i64,
    avg_position: f64,
    total_estimated_traffic: f64,
    persona_score: f64,
    sentiment: String,
    dsi_score: f64,
}

pub(crate) struct DsiCalculator {
    pool: PgPool,
}

impl DsiCalculator {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Compute and store all rankings for a run. Missing predecessor data
    /// yields a skipped outcome with explicit reasons rather than an error.
    pub(crate) async fn calculate_for_run(&self, run_id: Uuid) -> Result<DsiOutcome> {
        let mut skip_reasons = Vec::new();

        let serp_count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM serp_results WHERE pipeline_execution_id = $1")
                .bind(run_id)
                .fetch_one(&self.pool)
                .await
                .context("failed to count serp rows for dsi")?
                .try_get("count")
                .unwrap_or(0);
        if serp_count == 0 {
            skip_reasons.push("no SERP results collected".to_string());
        }

        let analysis_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM content_analysis")
            .fetch_one(&self.pool)
            .await
            .context("failed to count analyses for dsi")?
            .try_get("count")
            .unwrap_or(0);
        if analysis_count == 0 {
            skip_reasons.push("no content analysis results".to_string());
        }

        if !skip_reasons.is_empty() {
            return Ok(DsiOutcome {
                skipped: true,
                skip_reasons,
                ..DsiOutcome::default()
            });
        }

        // Recompute from scratch for this run.
        sqlx::query("DELETE FROM dsi_scores WHERE pipeline_execution_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("failed to clear prior dsi scores")?;

        let organic = self.organic_company_dsi(run_id).await?;
        let news = self.news_publisher_dsi(run_id).await?;
        let video = self.video_company_dsi(run_id).await?;

        let mut companies: std::collections::HashSet<String> = std::collections::HashSet::new();
        for row in &organic {
            self.store_company_score(run_id, row, "organic").await?;
            companies.insert(row.domain.clone());
        }
        for row in &news {
            self.store_company_score(run_id, row, "news").await?;
            companies.insert(row.domain.clone());
        }
        for row in &video {
            self.store_company_score(run_id, row, "video").await?;
            companies.insert(row.domain.clone());
        }

        let mut pages_ranked = 0;
        for serp_type in ["organic", "news"] {
            let pages = self.page_dsi(run_id, serp_type).await?;
            pages_ranked += pages.len();
            self.store_page_snapshots(&pages, serp_type).await?;
        }
        let video_pages = self.video_page_dsi(run_id).await?;
        pages_ranked += video_pages.len();
        self.store_page_snapshots(&video_pages, "video").await?;

        info!(
            %run_id,
            companies = companies.len(),
            pages = pages_ranked,
            "dsi rankings stored"
        );

        Ok(DsiOutcome {
            companies_ranked: companies.len(),
            pages_ranked,
            skipped: false,
            skip_reasons: Vec::new(),
        })
    }

    /// Organic company DSI:
    /// keyword_coverage% x traffic_share% x (persona / 10).
    async fn organic_company_dsi(&self, run_id: Uuid) -> Result<Vec<CompanyDsiRow>> {
        let query = format!(
            r"
            WITH serp_data AS (
                SELECT s.domain, s.keyword_id, s.url, s.position,
                       COALESCE(k.avg_monthly_searches, 1000) * {ctr} AS estimated_traffic
                FROM serp_results s
                JOIN keywords k ON s.keyword_id = k.id
                WHERE s.serp_type = 'organic'
                  AND s.pipeline_execution_id = $1
                  AND s.domain IS NOT NULL AND s.domain <> ''
            ),
            company_metrics AS (
                SELECT
                    s.domain,
                    COALESCE(MIN(cp.company_name),
                             INITCAP(REPLACE(SPLIT_PART(REGEXP_REPLACE(s.domain, '^www\.', ''), '.', 1), '-', ' '))
                    ) AS company_name,
                    COUNT(DISTINCT s.keyword_id) AS keyword_count,
                    COUNT(DISTINCT s.url) AS page_count,
                    AVG(s.position)::float AS avg_position,
                    COUNT(*) FILTER (WHERE s.position <= 10) AS top_10_count,
                    SUM(s.estimated_traffic) AS total_estimated_traffic,
                    COALESCE(
                        (SELECT AVG(da.score)
                         FROM content_analysis ca
                         JOIN dimension_analysis da ON da.analysis_id = ca.id
                         JOIN scraped_content sc ON sc.url = ca.url
                         WHERE sc.domain = s.domain
                           AND da.dimension_type = 'persona'
                        ), 5.0
                    ) AS persona_score
                FROM serp_data s
                LEFT JOIN company_profiles cp ON cp.domain = s.domain
                GROUP BY s.domain
            ),
            market_totals AS (
                SELECT COUNT(DISTINCT keyword_id) AS total_keywords,
                       SUM(estimated_traffic) AS total_market_traffic
                FROM serp_data
            )
            SELECT cm.company_name,
                   cm.domain,
                   cm.keyword_count,
                   cm.page_count,
                   cm.avg_position,
                   cm.top_10_count,
                   cm.total_estimated_traffic,
                   cm.persona_score,
                   cm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100 AS keyword_coverage_pct,
                   cm.total_estimated_traffic / NULLIF(mt.total_market_traffic, 0) * 100 AS traffic_share_pct,
                   (cm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100) *
                   (cm.total_estimated_traffic / NULLIF(mt.total_market_traffic, 0) * 100) *
                   (cm.persona_score / 10.0) AS dsi_pct
            FROM company_metrics cm
            CROSS JOIN market_totals mt
            WHERE cm.keyword_count >= 1
            ORDER BY dsi_pct DESC NULLS LAST, cm.keyword_count DESC
            ",
            ctr = CTR_CASE_SQL.replace("position", "s.position"),
        );

        let rows = sqlx::query(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("organic company dsi query failed")?;

        Ok(rows.iter().map(company_row).collect())
    }

    /// News publisher DSI:
    /// appearance_share% x keyword_coverage% x (persona_alignment / 10).
    async fn news_publisher_dsi(&self, run_id: Uuid) -> Result<Vec<CompanyDsiRow>> {
        let query = r"
            WITH publisher_metrics AS (
                SELECT
                    s.domain,
                    COALESCE(MIN(cp.company_name),
                             INITCAP(REPLACE(SPLIT_PART(REGEXP_REPLACE(s.domain, '^www\.', ''), '.', 1), '-', ' '))
                    ) AS company_name,
                    COUNT(DISTINCT s.keyword_id) AS keyword_count,
                    COUNT(DISTINCT s.url) AS article_count,
                    COUNT(*) AS serp_appearances,
                    AVG(s.position)::float AS avg_position,
                    COALESCE(
                        (SELECT AVG(da.score)
                         FROM content_analysis ca
                         JOIN dimension_analysis da ON da.analysis_id = ca.id
                         JOIN scraped_content sc ON sc.url = ca.url
                         WHERE sc.domain = s.domain
                           AND da.dimension_type = 'persona'
                        ), 5.0
                    ) AS persona_score
                FROM serp_results s
                LEFT JOIN company_profiles cp ON cp.domain = s.domain
                WHERE s.serp_type = 'news'
                  AND s.pipeline_execution_id = $1
                  AND s.position <= 100
                  AND s.domain IS NOT NULL AND s.domain <> ''
                GROUP BY s.domain
            ),
            market_totals AS (
                SELECT (SELECT COUNT(DISTINCT keyword_id) FROM serp_results
                        WHERE serp_type = 'news' AND pipeline_execution_id = $1) AS total_keywords,
                       (SELECT SUM(serp_appearances) FROM publisher_metrics) AS total_appearances
            )
            SELECT pm.company_name,
                   pm.domain,
                   pm.keyword_count,
                   pm.article_count AS page_count,
                   pm.avg_position,
                   0::bigint AS top_10_count,
                   0::float AS total_estimated_traffic,
                   pm.persona_score,
                   pm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100 AS keyword_coverage_pct,
                   0::float AS traffic_share_pct,
                   (pm.serp_appearances::float / NULLIF(mt.total_appearances, 0) * 100) *
                   (pm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100) *
                   (pm.persona_score / 10.0) AS dsi_pct
            FROM publisher_metrics pm
            CROSS JOIN market_totals mt
            WHERE pm.keyword_count >= 1
            ORDER BY dsi_pct DESC NULLS LAST
            ";

        let rows = sqlx::query(query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("news publisher dsi query failed")?;

        Ok(rows.iter().map(company_row).collect())
    }

    /// Video company DSI over resolved channel mappings:
    /// appearance_share% x keyword_coverage% x (persona_alignment / 10).
    async fn video_company_dsi(&self, run_id: Uuid) -> Result<Vec<CompanyDsiRow>> {
        let query = r"
            WITH video_company AS (
                SELECT sr.url, sr.keyword_id, sr.position,
                       COALESCE(cc.company_domain,
                                CASE WHEN vs.channel_title ~ '^[a-zA-Z0-9-]+\.(com|net|org|io|co)$'
                                     THEN LOWER(vs.channel_title) END
                       ) AS company_domain,
                       COALESCE(cc.company_name, vs.channel_title, 'Unknown') AS company_name
                FROM serp_results sr
                INNER JOIN video_snapshots vs ON vs.video_url = sr.url
                LEFT JOIN channel_companies cc ON cc.channel_id = vs.channel_id
                WHERE sr.serp_type = 'video'
                  AND sr.pipeline_execution_id = $1
            ),
            company_metrics AS (
                SELECT company_domain AS domain,
                       MIN(company_name) AS company_name,
                       COUNT(DISTINCT keyword_id) AS keyword_count,
                       COUNT(DISTINCT url) AS video_count,
                       COUNT(*) AS serp_appearances,
                       AVG(position)::float AS avg_position
                FROM video_company
                WHERE company_domain IS NOT NULL AND company_domain <> ''
                GROUP BY company_domain
            ),
            market_totals AS (
                SELECT (SELECT COUNT(DISTINCT keyword_id) FROM serp_results
                        WHERE serp_type = 'video' AND pipeline_execution_id = $1) AS total_keywords,
                       (SELECT SUM(serp_appearances) FROM company_metrics) AS total_appearances
            )
            SELECT cm.company_name,
                   cm.domain,
                   cm.keyword_count,
                   cm.video_count AS page_count,
                   cm.avg_position,
                   0::bigint AS top_10_count,
                   0::float AS total_estimated_traffic,
                   5.0::float AS persona_score,
                   cm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100 AS keyword_coverage_pct,
                   0::float AS traffic_share_pct,
                   (cm.serp_appearances::float / NULLIF(mt.total_appearances, 0) * 100) *
                   (cm.keyword_count::float / NULLIF(mt.total_keywords, 0) * 100) *
                   (5.0 / 10.0) AS dsi_pct
            FROM company_metrics cm
            CROSS JOIN market_totals mt
            WHERE cm.keyword_count >= 1
            ORDER BY dsi_pct DESC NULLS LAST
            ";

        let rows = sqlx::query(query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("video company dsi query failed")?;

        Ok(rows.iter().map(company_row).collect())
    }

    /// Page DSI for organic/news: traffic_share%(page) x (persona / 10).
    async fn page_dsi(&self, run_id: Uuid, serp_type: &str) -> Result<Vec<PageDsiRow>> {
        let query = format!(
            r"
            WITH page_serp_data AS (
                SELECT sr.url, sr.title, sr.domain, sr.keyword_id, sr.position,
                       COALESCE(k.avg_monthly_searches, 1000) * {ctr} AS estimated_traffic
                FROM serp_results sr
                LEFT JOIN keywords k ON k.id = sr.keyword_id
                WHERE sr.serp_type = $2
                  AND sr.pipeline_execution_id = $1
            ),
            page_metrics AS (
                SELECT url,
                       MAX(title) AS title,
                       MAX(domain) AS domain,
                       COUNT(DISTINCT keyword_id) AS keyword_count,
                       AVG(position)::float AS avg_position,
                       SUM(estimated_traffic) AS total_estimated_traffic
                FROM page_serp_data
                GROUP BY url
            ),
            page_analysis AS (
                SELECT ca.url,
                       ca.overall_sentiment,
                       COALESCE(
                           (SELECT AVG(da.score) FROM dimension_analysis da
                            WHERE da.analysis_id = ca.id AND da.dimension_type = 'persona'),
                           5.0
                       ) AS persona_score
                FROM content_analysis ca
            ),
            market_totals AS (
                SELECT SUM(estimated_traffic) AS total_market_traffic
                FROM page_serp_data
            )
            SELECT pm.url, pm.title, pm.domain, pm.keyword_count, pm.avg_position,
                   pm.total_estimated_traffic,
                   COALESCE(pa.persona_score, 5.0) AS persona_score,
                   COALESCE(pa.overall_sentiment, 'neutral') AS sentiment,
                   (pm.total_estimated_traffic / NULLIF(mt.total_market_traffic, 0) * 100.0) *
                   (COALESCE(pa.persona_score, 5.0) / 10.0) AS dsi_score
            FROM page_metrics pm
            LEFT JOIN page_analysis pa ON pa.url = pm.url
            CROSS JOIN market_totals mt
            WHERE pm.keyword_count > 0
            ORDER BY dsi_score DESC NULLS LAST, pm.keyword_count DESC
            ",
            ctr = CTR_CASE_SQL.replace("position", "sr.position"),
        );

        let rows = sqlx::query(&query)
            .bind(run_id)
            .bind(serp_type)
            .fetch_all(&self.pool)
            .await
            .context("page dsi query failed")?;

        Ok(rows.iter().map(page_row).collect())
    }

    /// Page DSI for video: serp_appearances x max_views x engagement_rate,
    /// min-max normalized to [0,100] within the run.
    async fn video_page_dsi(&self, run_id: Uuid) -> Result<Vec<PageDsiRow>> {
        let query = r"
            WITH video_data AS (
                SELECT sr.url,
                       COALESCE(sr.title, vs.video_title) AS title,
                       sr.domain, sr.keyword_id, sr.position,
                       COALESCE(vs.view_count, 0) AS view_count,
                       COALESCE(NULLIF(vs.engagement_rate, 0), 0.01) AS engagement_rate
                FROM serp_results sr
                INNER JOIN video_snapshots vs ON vs.video_url = sr.url
                WHERE sr.serp_type = 'video'
                  AND sr.pipeline_execution_id = $1
            ),
            page_metrics AS (
                SELECT url,
                       MAX(title) AS title,
                       MAX(domain) AS domain,
                       COUNT(DISTINCT keyword_id) AS keyword_count,
                       AVG(position)::float AS avg_position,
                       SUM(view_count)::float AS total_estimated_traffic,
                       COUNT(*) AS serp_appearances,
                       MAX(view_count) AS max_views,
                       MAX(engagement_rate) AS engagement_rate
                FROM video_data
                GROUP BY url
            ),
            scored AS (
                SELECT pm.*,
                       (pm.serp_appearances::float * pm.max_views::float * pm.engagement_rate) AS dsi_raw,
                       MAX(pm.serp_appearances::float * pm.max_views::float * pm.engagement_rate)
                           OVER () AS dsi_raw_max
                FROM page_metrics pm
            )
            SELECT url, title, domain, keyword_count, avg_position, total_estimated_traffic,
                   5.0::float AS persona_score,
                   'neutral' AS sentiment,
                   CASE WHEN dsi_raw_max > 0 THEN dsi_raw / dsi_raw_max * 100.0 ELSE 0 END AS dsi_score
            FROM scored
            ORDER BY dsi_score DESC, keyword_count DESC
            ";

        let rows = sqlx::query(query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("video page dsi query failed")?;

        Ok(rows.iter().map(page_row).collect())
    }

    async fn store_company_score(
        &self,
        run_id: Uuid,
        row: &CompanyDsiRow,
        source: &str,
    ) -> Result<()> {
        // Percentage product normalized to [0,1] at storage time.
        let dsi_score = (row.dsi_pct / 100.0).clamp(0.0, 1.0);
        let keyword_overlap = (row.keyword_coverage_pct / 100.0).clamp(0.0, 1.0);
        let traffic_share = (row.traffic_share_pct / 100.0).clamp(0.0, 1.0);
        let content_relevance = (row.persona_score / 10.0).clamp(0.0, 1.0);
        let market_presence = if row.keyword_count > 0 {
            (row.top_10_count as f64 / row.keyword_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let serp_visibility = (1.0 - row.avg_position / 20.0).clamp(0.0, 1.0);

        let metadata = json!({
            "source": source,
            "company_name": row.company_name,
            "keyword_count": row.keyword_count,
            "page_count": row.page_count,
            "avg_position": row.avg_position,
            "top_10_count": row.top_10_count,
            "total_estimated_traffic": row.total_estimated_traffic,
            "keyword_coverage_pct": row.keyword_coverage_pct,
            "traffic_share_pct": row.traffic_share_pct,
            "persona_score": row.persona_score,
            "dsi_pct": row.dsi_pct,
        });

        sqlx::query(
            r"
            INSERT INTO dsi_scores (
                pipeline_execution_id, company_domain, dsi_score,
                keyword_overlap_score, content_relevance_score, market_presence_score,
                traffic_share_score, serp_visibility_score, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (pipeline_execution_id, company_domain)
            DO UPDATE SET
                dsi_score = GREATEST(dsi_scores.dsi_score, EXCLUDED.dsi_score),
                keyword_overlap_score = GREATEST(dsi_scores.keyword_overlap_score, EXCLUDED.keyword_overlap_score),
                content_relevance_score = GREATEST(dsi_scores.content_relevance_score, EXCLUDED.content_relevance_score),
                market_presence_score = GREATEST(dsi_scores.market_presence_score, EXCLUDED.market_presence_score),
                traffic_share_score = GREATEST(dsi_scores.traffic_share_score, EXCLUDED.traffic_share_score),
                serp_visibility_score = GREATEST(dsi_scores.serp_visibility_score, EXCLUDED.serp_visibility_score),
                metadata = dsi_scores.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            ",
        )
        .bind(run_id)
        .bind(&row.domain)
        .bind(dsi_score)
        .bind(keyword_overlap)
        .bind(content_relevance)
        .bind(market_presence)
        .bind(traffic_share)
        .bind(serp_visibility)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .context("failed to upsert dsi score")?;

        Ok(())
    }

    /// Per-page snapshots keyed by (url, snapshot_date) for trend analysis.
    async fn store_page_snapshots(&self, pages: &[PageDsiRow], source_type: &str) -> Result<()> {
        let snapshot_date = Utc::now().date_naive();

        for (index, page) in pages.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO historical_page_dsi_snapshots (
                    snapshot_date, url, domain, page_title, page_dsi_score,
                    page_dsi_rank, keyword_count, estimated_traffic, avg_position,
                    persona_score, sentiment, source_type, is_active
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, TRUE)
                ON CONFLICT (url, snapshot_date)
                DO UPDATE SET
                    page_dsi_score = EXCLUDED.page_dsi_score,
                    page_dsi_rank = EXCLUDED.page_dsi_rank,
                    keyword_count = EXCLUDED.keyword_count,
                    estimated_traffic = EXCLUDED.estimated_traffic,
                    avg_position = EXCLUDED.avg_position,
                    persona_score = EXCLUDED.persona_score,
                    sentiment = EXCLUDED.sentiment,
                    source_type = EXCLUDED.source_type
                ",
            )
            .bind(snapshot_date)
            .bind(&page.url)
            .bind(&page.domain)
            .bind(page.title.as_deref().map(|t| t.chars().take(255).collect::<String>()))
            .bind(page.dsi_score)
            .bind((index + 1) as i32)
            .bind(page.keyword_count as i32)
            .bind(page.total_estimated_traffic as i64)
            .bind(page.avg_position)
            .bind(page.persona_score)
            .bind(&page.sentiment)
            .bind(source_type)
            .execute(&self.pool)
            .await
            .context("failed to upsert page dsi snapshot")?;
        }

        Ok(())
    }
}

fn company_row(row: &sqlx::postgres::PgRow) -> CompanyDsiRow {
    CompanyDsiRow {
        company_name: row.try_get("company_name").unwrap_or_default(),
        domain: row.try_get("domain").unwrap_or_default(),
        keyword_count: row.try_get("keyword_count").unwrap_or(0),
        page_count: row.try_get("page_count").unwrap_or(0),
        avg_position: row.try_get("avg_position").unwrap_or(20.0),
        top_10_count: row.try_get("top_10_count").unwrap_or(0),
        total_estimated_traffic: row.try_get("total_estimated_traffic").unwrap_or(0.0),
        persona_score: row.try_get("persona_score").unwrap_or(5.0),
        keyword_coverage_pct: row.try_get("keyword_coverage_pct").unwrap_or(0.0),
        traffic_share_pct: row.try_get("traffic_share_pct").unwrap_or(0.0),
        dsi_pct: row.try_get("dsi_pct").unwrap_or(0.0),
    }
}

fn page_row(row: &sqlx::postgres::PgRow) -> PageDsiRow {
    PageDsiRow {
        url: row.try_get("url").unwrap_or_default(),
        domain: row.try_get("domain").unwrap_or_default(),
        title: row.try_get("title").ok().flatten(),
        keyword_count: row.try_get("keyword_count").unwrap_or(0),
        avg_position: row.try_get("avg_position").unwrap_or(20.0),
        total_estimated_traffic: row.try_get("total_estimated_traffic").unwrap_or(0.0),
        persona_score: row.try_get("persona_score").unwrap_or(5.0),
        sentiment: row.try_get("sentiment").unwrap_or_else(|_| "neutral".to_string()),
        dsi_score: row.try_get("dsi_score").unwrap_or(0.0),
    }
}
