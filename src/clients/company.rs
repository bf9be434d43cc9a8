/// Company enrichment provider client.
///
/// Two-step protocol: search candidates by domain, then redeem full details
/// by company id. All calls pass through a sliding-window rate limiter.
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Sliding-window limiter: at most `max_requests` per `window`.
pub(crate) struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub(crate) fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) >= self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    return;
                }
                *timestamps.front().expect("non-empty window") + self.window
            };
            sleep_until(wait_until).await;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CompanyCandidate {
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) industry: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) employees: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CompanyDetails {
    #[allow(dead_code)]
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub(crate) domain: Option<String>,
    #[serde(default)]
    pub(crate) industry: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) employees: Option<i64>,
    #[serde(default)]
    pub(crate) revenue: Option<f64>,
    #[serde(default)]
    pub(crate) technologies: Vec<String>,
    #[serde(default)]
    pub(crate) social_profiles: serde_json::Value,
    #[serde(default)]
    pub(crate) headquarters_location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    companies: Vec<CompanyCandidate>,
}

#[derive(Debug, Deserialize)]
struct RedeemResponse {
    #[serde(default)]
    companies: Vec<CompanyDetails>,
}

pub(crate) struct CompanyApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: SlidingWindowLimiter,
}

impl CompanyApiClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: Option<&str>,
        rate_limit_requests: usize,
        rate_limit_window: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build company API client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            limiter: SlidingWindowLimiter::new(rate_limit_requests, rate_limit_window),
        })
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("company API key not configured"))
    }

    /// Search candidate companies by registrable domain.
    pub(crate) async fn search_by_domain(&self, domain: &str) -> Result<Vec<CompanyCandidate>> {
        self.limiter.acquire().await;
        let url = format!("{}/search/companies", self.base_url);

        debug!(domain, "company search request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(&json!({ "website": domain }))
            .send()
            .await
            .context("company search request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("company search error ({}): {}", status, body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("failed to decode company search response")?;
        Ok(parsed.companies)
    }

    /// Redeem full details for previously searched company ids.
    pub(crate) async fn redeem(&self, company_ids: &[String]) -> Result<Vec<CompanyDetails>> {
        if company_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.limiter.acquire().await;
        let url = format!("{}/companies/redeem", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(&json!({ "ids": company_ids }))
            .send()
            .await
            .context("company redeem request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("company redeem error ({}): {}", status, body));
        }

        let parsed: RedeemResponse = response
            .json()
            .await
            .context("failed to decode company redeem response")?;
        Ok(parsed.companies)
    }
}

/// Map a raw headcount to the stored band.
#[must_use]
pub(crate) fn employee_range(count: Option<i64>) -> Option<String> {
    let count = count?;
    let range = match count {
        i64::MIN..=0 => return None,
        1..=10 => "1-10",
        11..=50 => "11-50",
        51..=200 => "51-200",
        201..=1000 => "201-1000",
        1001..=5000 => "1001-5000",
        _ => "5000+",
    };
    Some(range.to_string())
}

/// Map raw annual revenue to the stored band.
#[must_use]
pub(crate) fn revenue_range(revenue: Option<f64>) -> Option<String> {
    let revenue = revenue?;
    if revenue <= 0.0 {
        return None;
    }
    let range = if revenue < 1_000_000.0 {
        "<$1M"
    } else if revenue < 10_000_000.0 {
        "$1M-$10M"
    } else if revenue < 100_000_000.0 {
        "$10M-$100M"
    } else if revenue < 1_000_000_000.0 {
        "$100M-$1B"
    } else {
        "$1B+"
    };
    Some(range.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_by_domain_returns_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/companies"))
            .and(body_partial_json(json!({"website": "finastra.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "companies": [
                    {"id": "c1", "name": "Finastra", "industry": "Fintech"},
                    {"id": "c2", "name": "Vista Equity Partners"}
                ]
            })))
            .mount(&server)
            .await;

        let client = CompanyApiClient::new(&server.uri(), Some("key"), 1000, Duration::from_secs(60))
            .expect("client should build");

        let candidates = client
            .search_by_domain("finastra.com")
            .await
            .expect("search should succeed");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "Finastra");
    }

    #[tokio::test]
    async fn redeem_skips_empty_input() {
        let server = MockServer::start().await;
        let client = CompanyApiClient::new(&server.uri(), Some("key"), 1000, Duration::from_secs(60))
            .expect("client should build");

        let details = client.redeem(&[]).await.expect("empty redeem succeeds");
        assert!(details.is_empty());
    }

    #[tokio::test]
    async fn sliding_window_admits_up_to_limit_immediately() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn employee_ranges_band_correctly() {
        assert_eq!(employee_range(Some(5)).as_deref(), Some("1-10"));
        assert_eq!(employee_range(Some(200)).as_deref(), Some("51-200"));
        assert_eq!(employee_range(Some(9000)).as_deref(), Some("5000+"));
        assert_eq!(employee_range(Some(0)), None);
        assert_eq!(employee_range(None), None);
    }

    #[test]
    fn revenue_ranges_band_correctly() {
        assert_eq!(revenue_range(Some(500_000.0)).as_deref(), Some("<$1M"));
        assert_eq!(
            revenue_range(Some(50_000_000.0)).as_deref(),
            Some("$10M-$100M")
        );
        assert_eq!(revenue_range(Some(2e9)).as_deref(), Some("$1B+"));
        assert_eq!(revenue_range(None), None);
    }
}
