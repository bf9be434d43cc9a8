/// Category-aware retries with persisted history.
///
/// Errors are matched against `error_categories` rows (HTTP status first,
/// then substring patterns, then a built-in fallback); the category decides
/// recoverability, strategy, and delays.
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::robustness::circuit_breaker::CircuitBreakerError;
use crate::util::json::truncate_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryStrategy {
    Exponential,
    Linear,
    Constant,
    None,
}

impl RetryStrategy {
    fn parse(s: &str) -> Self {
        match s {
            "linear" => RetryStrategy::Linear,
            "constant" => RetryStrategy::Constant,
            "none" => RetryStrategy::None,
            _ => RetryStrategy::Exponential,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ErrorCategory {
    pub(crate) error_code: String,
    pub(crate) is_recoverable: bool,
    pub(crate) retry_strategy: RetryStrategy,
    pub(crate) max_retries: i32,
    pub(crate) base_delay_seconds: f64,
    pub(crate) max_delay_seconds: f64,
    pub(crate) http_status_codes: Vec<i32>,
    pub(crate) error_patterns: Vec<String>,
}

impl ErrorCategory {
    fn unknown() -> Self {
        Self {
            error_code: "UNKNOWN".to_string(),
            is_recoverable: true,
            retry_strategy: RetryStrategy::Exponential,
            max_retries: 3,
            base_delay_seconds: 1.0,
            max_delay_seconds: 60.0,
            http_status_codes: Vec::new(),
            error_patterns: Vec::new(),
        }
    }
}

pub(crate) struct RetryManager {
    pool: PgPool,
    categories: RwLock<Option<HashMap<String, ErrorCategory>>>,
}

impl RetryManager {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            pool,
            categories: RwLock::new(None),
        }
    }

    /// Run `operation` until it succeeds, its category's retry budget is
    /// exhausted, or a non-recoverable category is hit.
    pub(crate) async fn retry_with_backoff<F, Fut, T>(
        &self,
        operation: F,
        entity_type: &str,
        entity_id: &str,
        max_attempts: Option<i32>,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_categories_loaded().await?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.record_success(entity_type, entity_id, attempt).await;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let category = self.categorize(&err).await;

                    if !category.is_recoverable {
                        error!(
                            error_code = %category.error_code,
                            error = %err,
                            "non-recoverable error, not retrying"
                        );
                        return Err(err);
                    }

                    let effective_max = max_attempts.unwrap_or(category.max_retries).max(1);
                    if attempt >= effective_max {
                        error!(
                            error_code = %category.error_code,
                            attempts = attempt,
                            max_attempts = effective_max,
                            error = %err,
                            "max retries exceeded"
                        );
                        return Err(err);
                    }

                    let delay = Self::delay_for(attempt, &category);
                    self.record_attempt(entity_type, entity_id, attempt, &category, &err, delay)
                        .await;

                    warn!(
                        error_code = %category.error_code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Resolve an error to its category. Order: circuit-open typed error,
    /// HTTP status codes, substring patterns, built-in fallback, UNKNOWN.
    pub(crate) async fn categorize(&self, error: &anyhow::Error) -> ErrorCategory {
        let categories = self.categories.read().await;
        let Some(categories) = categories.as_ref() else {
            return ErrorCategory::unknown();
        };

        if error.downcast_ref::<CircuitBreakerError>().is_some() {
            if let Some(category) = categories.get("CIRCUIT_OPEN") {
                return category.clone();
            }
        }

        let http_status = error
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status)
            .map(|status| i32::from(status.as_u16()));

        if let Some(status) = http_status {
            for category in categories.values() {
                if category.http_status_codes.contains(&status) {
                    return category.clone();
                }
            }
        }

        let message = format!("{error:#}").to_lowercase();
        for category in categories.values() {
            for pattern in &category.error_patterns {
                if !pattern.is_empty() && message.contains(&pattern.to_lowercase()) {
                    return category.clone();
                }
            }
        }

        // Built-in fallback on common substrings.
        let fallback_code = if message.contains("timeout") {
            Some("TIMEOUT")
        } else if message.contains("rate") && message.contains("limit") {
            Some("RATE_LIMIT")
        } else if message.contains("network") || message.contains("connection") {
            Some("NETWORK_ERROR")
        } else {
            None
        };
        if let Some(code) = fallback_code {
            if let Some(category) = categories.get(code) {
                return category.clone();
            }
        }

        categories
            .get("UNKNOWN")
            .cloned()
            .unwrap_or_else(ErrorCategory::unknown)
    }

    /// Delay before retrying after `attempt` (1-indexed) failures.
    pub(crate) fn delay_for(attempt: i32, category: &ErrorCategory) -> Duration {
        let attempt = attempt.max(1);
        let seconds = match category.retry_strategy {
            RetryStrategy::Exponential => {
                let delay = (category.base_delay_seconds
                    * 2_f64.powi(attempt - 1))
                .min(category.max_delay_seconds);
                let jitter = rand::rng().random_range(0.0..=delay * 0.1);
                delay + jitter
            }
            RetryStrategy::Linear => {
                (category.base_delay_seconds * f64::from(attempt)).min(category.max_delay_seconds)
            }
            RetryStrategy::Constant => category.base_delay_seconds,
            RetryStrategy::None => 0.0,
        };
        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Aggregated retry counts for observability.
    pub(crate) async fn statistics(
        &self,
        entity_type: Option<&str>,
        window_hours: i64,
    ) -> Result<Vec<RetryStats>> {
        let rows = sqlx::query(
            r"
            SELECT entity_type,
                   COUNT(*) AS total_retries,
                   COUNT(DISTINCT entity_id) AS unique_entities,
                   COUNT(*) FILTER (WHERE success) AS successful_retries,
                   COUNT(*) FILTER (WHERE NOT success) AS failed_retries
            FROM retry_history
            WHERE started_at > NOW() - ($1 * INTERVAL '1 hour')
              AND ($2::text IS NULL OR entity_type = $2)
            GROUP BY entity_type
            ",
        )
        .bind(window_hours)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .context("failed to aggregate retry history")?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows {
            let total: i64 = row.try_get("total_retries").unwrap_or(0);
            let successful: i64 = row.try_get("successful_retries").unwrap_or(0);
            stats.push(RetryStats {
                entity_type: row.try_get("entity_type").unwrap_or_default(),
                total_retries: total,
                unique_entities: row.try_get("unique_entities").unwrap_or(0),
                successful_retries: successful,
                failed_retries: row.try_get("failed_retries").unwrap_or(0),
                success_rate: if total > 0 {
                    successful as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
            });
        }
        Ok(stats)
    }

    async fn ensure_categories_loaded(&self) -> Result<()> {
        {
            let categories = self.categories.read().await;
            if categories.is_some() {
                return Ok(());
            }
        }

        let rows = sqlx::query(
            r"
            SELECT error_code, is_recoverable, retry_strategy, max_retries,
                   base_delay_seconds, max_delay_seconds, http_status_codes, error_patterns
            FROM error_categories
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load error categories")?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let strategy: String = row.try_get("retry_strategy").unwrap_or_default();
            let category = ErrorCategory {
                error_code: row.try_get("error_code").context("failed to get code")?,
                is_recoverable: row.try_get("is_recoverable").unwrap_or(true),
                retry_strategy: RetryStrategy::parse(&strategy),
                max_retries: row.try_get("max_retries").unwrap_or(3),
                base_delay_seconds: row.try_get("base_delay_seconds").unwrap_or(1.0),
                max_delay_seconds: row.try_get("max_delay_seconds").unwrap_or(60.0),
                http_status_codes: row.try_get("http_status_codes").unwrap_or_default(),
                error_patterns: row.try_get("error_patterns").unwrap_or_default(),
            };
            map.insert(category.error_code.clone(), category);
        }

        let mut categories = self.categories.write().await;
        *categories = Some(map);
        Ok(())
    }

    async fn record_attempt(
        &self,
        entity_type: &str,
        entity_id: &str,
        attempt: i32,
        category: &ErrorCategory,
        error: &anyhow::Error,
        delay: Duration,
    ) {
        let result = sqlx::query(
            r"
            INSERT INTO retry_history (
                entity_type, entity_id, attempt_number, started_at, success,
                error_code, error_message, retry_delay_seconds, next_retry_at
            ) VALUES ($1, $2, $3, NOW(), FALSE, $4, $5, $6, NOW() + ($6 * INTERVAL '1 second'))
            ",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(attempt)
        .bind(&category.error_code)
        .bind(truncate_error(&format!("{error:#}")))
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await;

        if let Err(db_err) = result {
            warn!(error = %db_err, "failed to record retry attempt");
        }
    }

    async fn record_success(&self, entity_type: &str, entity_id: &str, attempt: i32) {
        let result = sqlx::query(
            r"
            INSERT INTO retry_history (
                entity_type, entity_id, attempt_number, started_at, completed_at, success
            ) VALUES ($1, $2, $3, NOW(), NOW(), TRUE)
            ",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(attempt)
        .execute(&self.pool)
        .await;

        if let Err(db_err) = result {
            warn!(error = %db_err, "failed to record retry success");
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct RetryStats {
    pub(crate) entity_type: String,
    pub(crate) total_retries: i64,
    pub(crate) unique_entities: i64,
    pub(crate) successful_retries: i64,
    pub(crate) failed_retries: i64,
    pub(crate) success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(strategy: RetryStrategy, base: f64, max: f64) -> ErrorCategory {
        ErrorCategory {
            error_code: "TEST".to_string(),
            is_recoverable: true,
            retry_strategy: strategy,
            max_retries: 3,
            base_delay_seconds: base,
            max_delay_seconds: max,
            http_status_codes: Vec::new(),
            error_patterns: Vec::new(),
        }
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let cat = category(RetryStrategy::Exponential, 1.0, 60.0);

        // Jitter adds up to 10%, so check the envelope.
        let d1 = RetryManager::delay_for(1, &cat).as_secs_f64();
        assert!((1.0..=1.1).contains(&d1));

        let d3 = RetryManager::delay_for(3, &cat).as_secs_f64();
        assert!((4.0..=4.4).contains(&d3));

        let capped = RetryManager::delay_for(10, &cat).as_secs_f64();
        assert!(capped <= 66.0);
    }

    #[test]
    fn linear_delay_scales_with_attempt() {
        let cat = category(RetryStrategy::Linear, 2.0, 60.0);
        assert!((RetryManager::delay_for(1, &cat).as_secs_f64() - 2.0).abs() < f64::EPSILON);
        assert!((RetryManager::delay_for(3, &cat).as_secs_f64() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn constant_delay_ignores_attempt() {
        let cat = category(RetryStrategy::Constant, 5.0, 60.0);
        assert!((RetryManager::delay_for(7, &cat).as_secs_f64() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn none_strategy_returns_zero() {
        let cat = category(RetryStrategy::None, 5.0, 60.0);
        assert_eq!(RetryManager::delay_for(1, &cat), Duration::ZERO);
    }

    #[test]
    fn strategy_parse_defaults_to_exponential() {
        assert_eq!(RetryStrategy::parse("linear"), RetryStrategy::Linear);
        assert_eq!(RetryStrategy::parse("constant"), RetryStrategy::Constant);
        assert_eq!(RetryStrategy::parse("none"), RetryStrategy::None);
        assert_eq!(RetryStrategy::parse("whatever"), RetryStrategy::Exponential);
    }
}
