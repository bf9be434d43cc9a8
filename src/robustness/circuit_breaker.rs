/// Per-service circuit breaker persisted in Postgres.
///
/// State survives process restarts: a worker that comes back up inherits an
/// OPEN breaker instead of hammering a failing provider again.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum CircuitBreakerError {
    #[error("circuit breaker is open for {0}")]
    Open(String),
    #[error("circuit breaker half-open probe limit reached for {0}")]
    HalfOpenLimit(String),
}

#[derive(Debug, Clone)]
pub(crate) struct BreakerSnapshot {
    pub(crate) state: CircuitState,
    pub(crate) failure_count: i32,
    pub(crate) success_count: i32,
    pub(crate) opened_at: Option<DateTime<Utc>>,
    pub(crate) total_requests: i64,
    pub(crate) total_failures: i64,
    pub(crate) total_successes: i64,
}

impl BreakerSnapshot {
    pub(crate) fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.total_successes as f64 / self.total_requests as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BreakerConfig {
    pub(crate) failure_threshold: i32,
    pub(crate) success_threshold: i32,
    pub(crate) timeout: Duration,
    pub(crate) half_open_requests: i32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 5,
            timeout: Duration::from_secs(300),
            half_open_requests: 1,
        }
    }
}

pub(crate) struct CircuitBreaker {
    service_name: String,
    pool: PgPool,
    config: BreakerConfig,
    // Serializes state decisions and guards the half-open probe counter.
    decision: Mutex<i32>,
}

impl CircuitBreaker {
    pub(crate) fn new(service_name: impl Into<String>, pool: PgPool, config: BreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            pool,
            config,
            decision: Mutex::new(0),
        }
    }

    pub(crate) fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Execute `operation` through the breaker. An OPEN breaker rejects with
    /// [`CircuitBreakerError::Open`] without invoking the operation.
    pub(crate) async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut probes = self.decision.lock().await;
            let snapshot = self.load_state().await?;

            let mut state = snapshot.state;
            if state == CircuitState::Open {
                if self.should_attempt_reset(&snapshot) {
                    self.set_half_open().await?;
                    *probes = 0;
                    state = CircuitState::HalfOpen;
                    info!(service = %self.service_name, "circuit breaker entering half-open state");
                } else {
                    warn!(service = %self.service_name, "circuit breaker open, rejecting call");
                    return Err(CircuitBreakerError::Open(self.service_name.clone()).into());
                }
            }

            if state == CircuitState::HalfOpen {
                if *probes >= self.config.half_open_requests {
                    warn!(service = %self.service_name, "half-open probe limit reached");
                    return Err(CircuitBreakerError::HalfOpenLimit(self.service_name.clone()).into());
                }
                *probes += 1;
            }
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await?;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await?;
                Err(err)
            }
        }
    }

    pub(crate) async fn metrics(&self) -> Result<BreakerSnapshot> {
        self.load_state().await
    }

    /// Manual reset to CLOSED with counters cleared.
    pub(crate) async fn reset(&self) -> Result<()> {
        let mut probes = self.decision.lock().await;
        sqlx::query(
            r"
            UPDATE circuit_breakers
            SET state = 'closed', failure_count = 0, success_count = 0, updated_at = NOW()
            WHERE service_name = $1
            ",
        )
        .bind(&self.service_name)
        .execute(&self.pool)
        .await
        .context("failed to reset circuit breaker")?;
        *probes = 0;
        info!(service = %self.service_name, "circuit breaker manually reset to closed");
        Ok(())
    }

    fn should_attempt_reset(&self, snapshot: &BreakerSnapshot) -> bool {
        let Some(opened_at) = snapshot.opened_at else {
            return false;
        };
        let elapsed = Utc::now() - opened_at;
        elapsed.to_std().map(|e| e > self.config.timeout).unwrap_or(false)
    }

    async fn on_success(&self) -> Result<()> {
        let _probes = self.decision.lock().await;
        let snapshot = self.load_state().await?;

        match snapshot.state {
            CircuitState::HalfOpen => {
                if snapshot.success_count + 1 >= self.config.success_threshold {
                    sqlx::query(
                        r"
                        UPDATE circuit_breakers
                        SET state = 'closed',
                            failure_count = 0,
                            success_count = 0,
                            total_successes = total_successes + 1,
                            total_requests = total_requests + 1,
                            last_success_at = NOW(),
                            updated_at = NOW()
                        WHERE service_name = $1
                        ",
                    )
                    .bind(&self.service_name)
                    .execute(&self.pool)
                    .await
                    .context("failed to close circuit breaker")?;
                    info!(service = %self.service_name, "circuit breaker recovered to closed state");
                } else {
                    self.increment_success().await?;
                }
            }
            _ => self.increment_success().await?,
        }
        Ok(())
    }

    async fn on_failure(&self) -> Result<()> {
        let _probes = self.decision.lock().await;
        let snapshot = self.load_state().await?;

        match snapshot.state {
            CircuitState::Closed => {
                if snapshot.failure_count + 1 >= self.config.failure_threshold {
                    self.trip_open().await?;
                    error!(service = %self.service_name, "circuit breaker tripped to open state");
                } else {
                    self.increment_failure().await?;
                }
            }
            CircuitState::HalfOpen => {
                self.trip_open().await?;
                warn!(service = %self.service_name, "probe failed in half-open, back to open");
            }
            CircuitState::Open => self.increment_failure().await?,
        }
        Ok(())
    }

    async fn load_state(&self) -> Result<BreakerSnapshot> {
        let row = sqlx::query(
            r"
            INSERT INTO circuit_breakers (
                service_name, failure_threshold, success_threshold, timeout_seconds
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT (service_name) DO UPDATE SET updated_at = NOW()
            RETURNING state, failure_count, success_count, opened_at,
                      total_requests, total_failures, total_successes
            ",
        )
        .bind(&self.service_name)
        .bind(self.config.failure_threshold)
        .bind(self.config.success_threshold)
        .bind(self.config.timeout.as_secs() as i32)
        .fetch_one(&self.pool)
        .await
        .context("failed to load circuit breaker state")?;

        let state: String = row.try_get("state").context("failed to get state")?;
        Ok(BreakerSnapshot {
            state: CircuitState::parse(&state)
                .with_context(|| format!("invalid circuit state: {state}"))?,
            failure_count: row.try_get("failure_count").unwrap_or(0),
            success_count: row.try_get("success_count").unwrap_or(0),
            opened_at: row.try_get("opened_at").ok().flatten(),
            total_requests: row.try_get("total_requests").unwrap_or(0),
            total_failures: row.try_get("total_failures").unwrap_or(0),
            total_successes: row.try_get("total_successes").unwrap_or(0),
        })
    }

    async fn set_half_open(&self) -> Result<()> {
        sqlx::query(
            r"
            UPDATE circuit_breakers
            SET state = 'half_open',
                failure_count = 0,
                success_count = 0,
                half_opened_at = NOW(),
                updated_at = NOW()
            WHERE service_name = $1
            ",
        )
        .bind(&self.service_name)
        .execute(&self.pool)
        .await
        .context("failed to half-open circuit breaker")?;
        Ok(())
    }

    async fn trip_open(&self) -> Result<()> {
        sqlx::query(
            r"
            UPDATE circuit_breakers
            SET state = 'open',
                failure_count = failure_count + 1,
                total_failures = total_failures + 1,
                total_requests = total_requests + 1,
                opened_at = NOW(),
                last_failure_at = NOW(),
                updated_at = NOW()
            WHERE service_name = $1
            ",
        )
        .bind(&self.service_name)
        .execute(&self.pool)
        .await
        .context("failed to open circuit breaker")?;
        Ok(())
    }

    async fn increment_success(&self) -> Result<()> {
        sqlx::query(
            r"
            UPDATE circuit_breakers
            SET success_count = success_count + 1,
                total_successes = total_successes + 1,
                total_requests = total_requests + 1,
                last_success_at = NOW(),
                updated_at = NOW()
            WHERE service_name = $1
            ",
        )
        .bind(&self.service_name)
        .execute(&self.pool)
        .await
        .context("failed to record breaker success")?;
        Ok(())
    }

    async fn increment_failure(&self) -> Result<()> {
        sqlx::query(
            r"
            UPDATE circuit_breakers
            SET failure_count = failure_count + 1,
                total_failures = total_failures + 1,
                total_requests = total_requests + 1,
                last_failure_at = NOW(),
                updated_at = NOW()
            WHERE service_name = $1
            ",
        )
        .bind(&self.service_name)
        .execute(&self.pool)
        .await
        .context("failed to record breaker failure")?;
        Ok(())
    }
}

/// Lazily hands out one breaker per service name.
pub(crate) struct CircuitBreakerManager {
    pool: PgPool,
    default_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    pub(crate) fn new(pool: PgPool, default_config: BreakerConfig) -> Self {
        Self {
            pool,
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn get(&self, service_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(service_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service_name,
                    self.pool.clone(),
                    self.default_config,
                ))
            })
            .clone()
    }

    /// Look up an existing breaker without creating one.
    pub(crate) async fn find(&self, service_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().await.get(service_name).cloned()
    }

    pub(crate) async fn all_metrics(&self) -> Vec<(String, Result<BreakerSnapshot>)> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();

        let mut metrics = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            let snapshot = breaker.metrics().await;
            metrics.push((breaker.service_name().to_string(), snapshot));
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_state_round_trips() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(CircuitState::parse(state.as_str()), Some(state));
        }
        assert!(CircuitState::parse("ajar").is_none());
    }

    #[test]
    fn success_rate_handles_zero_requests() {
        let snapshot = BreakerSnapshot {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
        };
        assert!((snapshot.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn success_rate_is_percentage() {
        let snapshot = BreakerSnapshot {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            total_requests: 8,
            total_failures: 2,
            total_successes: 6,
        };
        assert!((snapshot.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn open_error_names_the_service() {
        let error = CircuitBreakerError::Open("scale_serp".to_string());
        assert_eq!(error.to_string(), "circuit breaker is open for scale_serp");
    }
}
