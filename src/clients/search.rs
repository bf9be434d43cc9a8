/// Batch search provider client.
///
/// Protocol: create a named batch, append searches in chunks of at most
/// 1000, start it, poll result sets, then download result pages (CSV when
/// offered, JSON otherwise).
use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) const SEARCH_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Immediate,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl ScheduleFrequency {
    /// Provider schedule_type; quarterly batches run as monthly on the
    /// provider side and are filtered by time period instead.
    fn schedule_type(self) -> &'static str {
        match self {
            ScheduleFrequency::Immediate => "manual",
            ScheduleFrequency::Daily => "daily",
            ScheduleFrequency::Weekly => "weekly",
            ScheduleFrequency::Monthly | ScheduleFrequency::Quarterly => "monthly",
        }
    }

    /// News time_period for a steady-state run of this schedule.
    pub(crate) fn news_time_period(self) -> &'static str {
        match self {
            ScheduleFrequency::Immediate | ScheduleFrequency::Daily => "last_day",
            ScheduleFrequency::Weekly => "last_week",
            ScheduleFrequency::Monthly => "last_month",
            ScheduleFrequency::Quarterly => "last_year",
        }
    }

    /// News time_period for the first run of a schedule: a wider window so
    /// the initial collection has historical depth.
    pub(crate) fn initial_news_time_period(self) -> &'static str {
        match self {
            ScheduleFrequency::Immediate | ScheduleFrequency::Daily => "last_week",
            ScheduleFrequency::Weekly => "last_month",
            ScheduleFrequency::Monthly | ScheduleFrequency::Quarterly => "last_year",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BatchSchedule {
    pub(crate) frequency: ScheduleFrequency,
    pub(crate) hour_of_day: u32,
    pub(crate) days_of_week: Vec<u32>,
    pub(crate) day_of_month: Option<u32>,
}

impl Default for BatchSchedule {
    fn default() -> Self {
        Self {
            frequency: ScheduleFrequency::Immediate,
            hour_of_day: 9,
            days_of_week: vec![1],
            day_of_month: None,
        }
    }
}

/// One search inside a provider batch.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BatchSearch {
    pub(crate) q: String,
    pub(crate) location: String,
    pub(crate) gl: String,
    pub(crate) hl: String,
    pub(crate) device: String,
    pub(crate) num: u32,
    pub(crate) output: String,
    pub(crate) custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) search_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_period: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResultSetMeta {
    pub(crate) id: i64,
    #[serde(default)]
    pub(crate) ended_at: Option<String>,
    #[serde(default)]
    pub(crate) searches_completed: i64,
    #[serde(default)]
    pub(crate) searches_failed: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct BatchResultSets {
    pub(crate) status: String,
    pub(crate) results_count: i64,
    pub(crate) searches_completed: i64,
    pub(crate) searches_total: i64,
    pub(crate) result_sets: Vec<ResultSetMeta>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DownloadLinks {
    pub(crate) csv_pages: Vec<String>,
    pub(crate) json_pages: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SearchProviderClient {
    client: Client,
    base_url: Url,
    api_key: String,
    webhook_url: Option<String>,
}

impl SearchProviderClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        webhook_url: Option<&str>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build search provider client")?;

        let base_url = Url::parse(base_url).context("invalid search provider base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            webhook_url: webhook_url.map(ToString::to_string),
        })
    }

    /// Step 1: create an empty named batch. The provider nests the payload
    /// under several shapes; all known ones are probed for the id.
    pub(crate) async fn create_batch(
        &self,
        name: &str,
        schedule: &BatchSchedule,
    ) -> Result<String> {
        let url = self.batches_url(&[])?;

        let mut config = json!({
            "name": name,
            "enabled": true,
            "schedule_type": schedule.frequency.schedule_type(),
            "priority": "normal",
        });

        if let Some(webhook) = &self.webhook_url {
            config["notification_webhook"] = json!(webhook);
            config["notification_as_json"] = json!(true);
            config["notification_as_csv"] = json!(true);
        }

        match schedule.frequency {
            ScheduleFrequency::Daily => {
                config["schedule_hours"] = json!([schedule.hour_of_day]);
            }
            ScheduleFrequency::Weekly => {
                config["schedule_days_of_week"] = json!(schedule.days_of_week);
                config["schedule_hours"] = json!([schedule.hour_of_day]);
            }
            ScheduleFrequency::Monthly | ScheduleFrequency::Quarterly => {
                config["schedule_days_of_month"] = json!([schedule.day_of_month.unwrap_or(1)]);
                config["schedule_hours"] = json!([schedule.hour_of_day]);
            }
            ScheduleFrequency::Immediate => {}
        }

        let response = self
            .client
            .post(url)
            .query(&[("api_key", &self.api_key)])
            .json(&config)
            .send()
            .await
            .context("batch creation request failed")?
            .error_for_status()
            .context("batch creation returned error status")?;

        let body: Value = response
            .json()
            .await
            .context("failed to decode batch creation response")?;

        let batch_id = body
            .pointer("/batch/id")
            .or_else(|| body.get("id"))
            .or_else(|| body.get("batch_id"))
            .or_else(|| body.pointer("/data/id"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("no batch id in creation response"))?;

        info!(batch_id = %batch_id, name, "created search batch");
        Ok(batch_id)
    }

    /// Step 2: append searches in chunks of at most 1000 per request.
    pub(crate) async fn add_searches(
        &self,
        batch_id: &str,
        searches: &[BatchSearch],
    ) -> Result<usize> {
        let url = self.batches_url(&[batch_id])?;
        let mut added = 0;

        for chunk in searches.chunks(SEARCH_CHUNK_SIZE) {
            let response = self
                .client
                .put(url.clone())
                .query(&[("api_key", &self.api_key)])
                .json(&json!({ "searches": chunk }))
                .send()
                .await
                .context("batch update request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!(
                    "batch update returned error status {}: {}",
                    status,
                    body
                ));
            }

            added += chunk.len();
            debug!(batch_id, added, "appended search chunk to batch");
        }

        info!(batch_id, total = added, "added searches to batch");
        Ok(added)
    }

    /// Step 3: start a manual batch.
    pub(crate) async fn start_batch(&self, batch_id: &str) -> Result<()> {
        let url = self.batches_url(&[batch_id, "start"])?;

        self.client
            .get(url)
            .query(&[("api_key", &self.api_key)])
            .send()
            .await
            .context("batch start request failed")?
            .error_for_status()
            .context("batch start returned error status")?;

        info!(batch_id, "started batch execution");
        Ok(())
    }

    /// Step 4: list result sets; the batch is done when its status is
    /// "idle" and at least one result set exists.
    pub(crate) async fn list_result_sets(&self, batch_id: &str) -> Result<BatchResultSets> {
        let url = self.batches_url(&[batch_id, "results"])?;

        let body: Value = self
            .client
            .get(url)
            .query(&[("api_key", &self.api_key)])
            .send()
            .await
            .context("result set listing request failed")?
            .error_for_status()
            .context("result set listing returned error status")?
            .json()
            .await
            .context("failed to decode result set listing")?;

        let result_sets = body
            .get("results")
            .cloned()
            .map(|v| serde_json::from_value::<Vec<ResultSetMeta>>(v).unwrap_or_default())
            .unwrap_or_default();

        Ok(BatchResultSets {
            status: body
                .pointer("/batch/status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            results_count: body
                .get("results_count")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            searches_completed: body
                .pointer("/batch/searches_completed")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            searches_total: body
                .pointer("/batch/searches_total_count")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            result_sets,
        })
    }

    /// Step 5: fetch the download links for one result set.
    pub(crate) async fn download_links(
        &self,
        batch_id: &str,
        result_set_id: i64,
    ) -> Result<DownloadLinks> {
        let url = self.batches_url(&[batch_id, "results", &result_set_id.to_string()])?;

        let body: Value = self
            .client
            .get(url)
            .query(&[("api_key", &self.api_key)])
            .send()
            .await
            .context("result set detail request failed")?
            .error_for_status()
            .context("result set detail returned error status")?
            .json()
            .await
            .context("failed to decode result set detail")?;

        Ok(Self::parse_download_links(&body))
    }

    pub(crate) fn parse_download_links(body: &Value) -> DownloadLinks {
        let pages_at = |pointer: &str| -> Vec<String> {
            body.pointer(pointer)
                .and_then(Value::as_array)
                .map(|pages| {
                    pages
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        // Plain `download_links.pages` carries JSON pages; typed variants
        // appear for webhook notifications.
        let mut links = DownloadLinks {
            csv_pages: pages_at("/result/download_links/csv/pages"),
            json_pages: pages_at("/result/download_links/json/pages"),
        };
        if links.csv_pages.is_empty() && links.json_pages.is_empty() {
            links.json_pages = pages_at("/result/download_links/pages");
        }
        if links.csv_pages.is_empty() && links.json_pages.is_empty() {
            warn!("result set carried no download links");
        }
        links
    }

    /// Step 6: download one result page as raw text (CSV or JSON).
    pub(crate) async fn download_page(&self, page_url: &str) -> Result<String> {
        let response = self
            .client
            .get(page_url)
            .send()
            .await
            .context("result page download failed")?
            .error_for_status()
            .context("result page download returned error status")?;

        response
            .text()
            .await
            .context("failed to read result page body")
    }

    fn batches_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| anyhow!("search provider base URL cannot be a base"))?;
            path.push("batches");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SearchProviderClient {
        SearchProviderClient::new(&server.uri(), "test-key", None).expect("client should build")
    }

    fn search(q: &str) -> BatchSearch {
        BatchSearch {
            q: q.to_string(),
            location: "United States".to_string(),
            gl: "us".to_string(),
            hl: "en".to_string(),
            device: "desktop".to_string(),
            num: 50,
            output: "json".to_string(),
            custom_id: format!("{q}_US_organic"),
            search_type: None,
            time_period: None,
        }
    }

    #[tokio::test]
    async fn create_batch_extracts_nested_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batches"))
            .and(query_param("api_key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"batch": {"id": "B123"}})),
            )
            .mount(&server)
            .await;

        let batch_id = client(&server)
            .create_batch("test batch", &BatchSchedule::default())
            .await
            .expect("batch should be created");

        assert_eq!(batch_id, "B123");
    }

    #[tokio::test]
    async fn create_batch_fails_without_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let error = client(&server)
            .create_batch("test batch", &BatchSchedule::default())
            .await
            .expect_err("missing id should fail");

        assert!(error.to_string().contains("no batch id"));
    }

    #[tokio::test]
    async fn add_searches_chunks_requests() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/batches/B123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(3)
            .mount(&server)
            .await;

        let searches: Vec<BatchSearch> =
            (0..2500).map(|i| search(&format!("kw {i}"))).collect();

        let added = client(&server)
            .add_searches("B123", &searches)
            .await
            .expect("searches should be added");

        assert_eq!(added, 2500);
    }

    #[tokio::test]
    async fn list_result_sets_parses_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/batches/B123/results"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results_count": 1,
                "batch": {"status": "idle", "searches_completed": 10, "searches_total_count": 10},
                "results": [{"id": 7, "ended_at": "2026-07-15T10:00:00Z",
                             "searches_completed": 10, "searches_failed": 0}]
            })))
            .mount(&server)
            .await;

        let sets = client(&server)
            .list_result_sets("B123")
            .await
            .expect("result sets should parse");

        assert_eq!(sets.status, "idle");
        assert_eq!(sets.results_count, 1);
        assert_eq!(sets.result_sets[0].id, 7);
    }

    #[test]
    fn download_links_prefer_typed_pages() {
        let body = json!({
            "result": {"download_links": {
                "csv": {"pages": ["https://dl/csv1"]},
                "json": {"pages": ["https://dl/json1"]}
            }}
        });
        let links = SearchProviderClient::parse_download_links(&body);
        assert_eq!(links.csv_pages, vec!["https://dl/csv1"]);
        assert_eq!(links.json_pages, vec!["https://dl/json1"]);
    }

    #[test]
    fn download_links_fall_back_to_plain_pages() {
        let body = json!({
            "result": {"download_links": {"pages": ["https://dl/page1"]}}
        });
        let links = SearchProviderClient::parse_download_links(&body);
        assert!(links.csv_pages.is_empty());
        assert_eq!(links.json_pages, vec!["https://dl/page1"]);
    }

    #[test]
    fn news_time_periods_map_from_frequency() {
        assert_eq!(ScheduleFrequency::Daily.news_time_period(), "last_day");
        assert_eq!(ScheduleFrequency::Weekly.news_time_period(), "last_week");
        assert_eq!(ScheduleFrequency::Monthly.news_time_period(), "last_month");
        assert_eq!(ScheduleFrequency::Quarterly.news_time_period(), "last_year");
    }

    #[test]
    fn initial_run_widens_the_window() {
        assert_eq!(
            ScheduleFrequency::Weekly.initial_news_time_period(),
            "last_month"
        );
        assert_eq!(
            ScheduleFrequency::Monthly.initial_news_time_period(),
            "last_year"
        );
    }
}
