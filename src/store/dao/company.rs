use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use crate::store::models::{CompanyProfile, SourceType};

#[derive(Debug, Clone)]
pub(crate) struct CompanyDao {
    pool: PgPool,
}

impl CompanyDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a profile keyed by domain and refresh its alias row.
    pub(crate) async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin profile tx")?;

        sqlx::query(
            r"
            INSERT INTO company_profiles (
                domain, company_name, industry, employee_range, revenue_range,
                description, source, source_type, confidence_score,
                technologies, social_profiles, headquarters_location,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
            ON CONFLICT (domain)
            DO UPDATE SET
                company_name = EXCLUDED.company_name,
                industry = EXCLUDED.industry,
                employee_range = EXCLUDED.employee_range,
                revenue_range = EXCLUDED.revenue_range,
                description = EXCLUDED.description,
                source = EXCLUDED.source,
                source_type = EXCLUDED.source_type,
                confidence_score = EXCLUDED.confidence_score,
                technologies = EXCLUDED.technologies,
                social_profiles = EXCLUDED.social_profiles,
                headquarters_location = EXCLUDED.headquarters_location,
                updated_at = NOW()
            ",
        )
        .bind(&profile.domain)
        .bind(&profile.company_name)
        .bind(&profile.industry)
        .bind(&profile.employee_range)
        .bind(&profile.revenue_range)
        .bind(&profile.description)
        .bind(&profile.source)
        .bind(profile.source_type.as_str())
        .bind(profile.confidence_score)
        .bind(&profile.technologies)
        .bind(&profile.social_profiles)
        .bind(&profile.headquarters_location)
        .execute(&mut *tx)
        .await
        .context("failed to upsert company profile")?;

        sqlx::query(
            r"
            INSERT INTO company_domains (domain, company_domain, created_at)
            VALUES ($1, $1, NOW())
            ON CONFLICT (domain) DO NOTHING
            ",
        )
        .bind(&profile.domain)
        .execute(&mut *tx)
        .await
        .context("failed to upsert company domain alias")?;

        tx.commit().await.context("failed to commit profile tx")?;
        Ok(())
    }

    /// Record an alias domain pointing at an existing company.
    pub(crate) async fn add_alias(&self, alias: &str, company_domain: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO company_domains (domain, company_domain, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (domain) DO UPDATE SET company_domain = EXCLUDED.company_domain
            ",
        )
        .bind(alias)
        .bind(company_domain)
        .execute(&self.pool)
        .await
        .context("failed to upsert company domain alias")?;

        Ok(())
    }

    /// Persist a detected parent relationship on the child profile.
    pub(crate) async fn set_parent(&self, domain: &str, parent_domain: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE company_profiles
            SET parent_company_domain = $2, updated_at = NOW()
            WHERE domain = $1
            ",
        )
        .bind(domain)
        .bind(parent_domain)
        .execute(&self.pool)
        .await
        .context("failed to set parent company")?;

        Ok(())
    }

    /// Which of the given domains already have profiles (dedupe before the
    /// enrichment fan-out).
    pub(crate) async fn existing_domains(&self, domains: &[String]) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT domain FROM company_profiles WHERE domain = ANY($1)")
            .bind(domains)
            .fetch_all(&self.pool)
            .await
            .context("failed to check existing company domains")?;

        rows.iter()
            .map(|row| row.try_get("domain").context("failed to get domain"))
            .collect()
    }

    pub(crate) async fn get(&self, domain: &str) -> Result<Option<CompanyProfile>> {
        let row = sqlx::query(
            r"
            SELECT domain, company_name, industry, employee_range, revenue_range,
                   description, source, source_type, confidence_score,
                   technologies, social_profiles, headquarters_location
            FROM company_profiles
            WHERE domain = $1
            ",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load company profile")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let source_type: String = row.try_get("source_type").unwrap_or_default();
        Ok(Some(CompanyProfile {
            domain: row.try_get("domain").context("failed to get domain")?,
            company_name: row.try_get("company_name").unwrap_or_default(),
            industry: row.try_get("industry").ok().flatten(),
            employee_range: row.try_get("employee_range").ok().flatten(),
            revenue_range: row.try_get("revenue_range").ok().flatten(),
            description: row.try_get("description").ok().flatten(),
            source: row.try_get("source").unwrap_or_default(),
            source_type: SourceType::parse(&source_type).unwrap_or(SourceType::Other),
            confidence_score: row.try_get("confidence_score").unwrap_or(0.0),
            technologies: row.try_get("technologies").unwrap_or_default(),
            social_profiles: row
                .try_get("social_profiles")
                .unwrap_or(serde_json::Value::Null),
            headquarters_location: row.try_get("headquarters_location").ok().flatten(),
        }))
    }
}
