use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use crate::store::models::Keyword;

#[derive(Debug, Clone)]
pub(crate) struct KeywordDao {
    pool: PgPool,
}

impl KeywordDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensure every keyword exists, returning the full rows.
    pub(crate) async fn upsert_keywords(&self, keywords: &[String]) -> Result<Vec<Keyword>> {
        for keyword in keywords {
            sqlx::query(
                r"
                INSERT INTO keywords (id, keyword, created_at)
                VALUES (gen_random_uuid(), $1, NOW())
                ON CONFLICT (keyword) DO NOTHING
                ",
            )
            .bind(keyword)
            .execute(&self.pool)
            .await
            .context("failed to upsert keyword")?;
        }
        self.get_by_texts(keywords).await
    }

    pub(crate) async fn get_by_texts(&self, keywords: &[String]) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            r"
            SELECT id, keyword, avg_monthly_searches
            FROM keywords
            WHERE keyword = ANY($1)
            ORDER BY keyword
            ",
        )
        .bind(keywords)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch keywords by text")?;

        rows.into_iter().map(Self::row_to_keyword).collect()
    }

    pub(crate) async fn all(&self) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            r"
            SELECT id, keyword, avg_monthly_searches
            FROM keywords
            ORDER BY keyword
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch keywords")?;

        rows.into_iter().map(Self::row_to_keyword).collect()
    }

    pub(crate) async fn get_by_text(&self, keyword: &str) -> Result<Option<Keyword>> {
        let row = sqlx::query(
            r"
            SELECT id, keyword, avg_monthly_searches
            FROM keywords
            WHERE keyword = $1
            ",
        )
        .bind(keyword)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch keyword")?;

        row.map(Self::row_to_keyword).transpose()
    }

    /// Keywords still missing search-volume metrics.
    pub(crate) async fn without_metrics(&self, texts: &[String]) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            r"
            SELECT id, keyword, avg_monthly_searches
            FROM keywords
            WHERE keyword = ANY($1) AND avg_monthly_searches IS NULL
            ",
        )
        .bind(texts)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch keywords without metrics")?;

        rows.into_iter().map(Self::row_to_keyword).collect()
    }

    fn row_to_keyword(row: sqlx::postgres::PgRow) -> Result<Keyword> {
        Ok(Keyword {
            id: row.try_get("id").context("failed to get id")?,
            keyword: row.try_get("keyword").context("failed to get keyword")?,
            avg_monthly_searches: row.try_get("avg_monthly_searches").ok().flatten(),
        })
    }
}
