/// SERP batch collector.
///
/// Fans searches out to the batch search provider (create → add in chunks →
/// start), monitors result sets on an interval, and ingests downloads with
/// upsert-on-natural-key semantics so re-ingesting a result set is a no-op.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::search::{BatchSchedule, BatchSearch, DownloadLinks, SearchProviderClient};
use crate::config::Config;
use crate::pipeline::events::EventHub;
use crate::robustness::circuit_breaker::CircuitBreaker;
use crate::robustness::retry::RetryManager;
use crate::robustness::state_tracker::{StateTracker, WorkItem};
use crate::serp::parse::{ParsedResult, parse_csv_page, parse_json_page};
use crate::store::dao::keywords::KeywordDao;
use crate::store::dao::serp::SerpDao;
use crate::store::models::{Keyword, SerpKind, SerpRecord};

/// A created-and-started provider batch awaiting results.
#[derive(Debug, Clone)]
pub(crate) struct BatchHandle {
    pub(crate) batch_id: String,
    pub(crate) kind: SerpKind,
    pub(crate) searches_total: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct IngestOutcome {
    pub(crate) stored: usize,
    pub(crate) failed: usize,
    pub(crate) keywords_processed: usize,
}

pub(crate) struct SerpBatchCollector {
    client: Arc<SearchProviderClient>,
    serp_dao: SerpDao,
    keyword_dao: KeywordDao,
    state_tracker: Arc<StateTracker>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryManager>,
    events: Arc<EventHub>,
    max_results_per_type: u32,
    monitor_interval: std::time::Duration,
    batch_timeout: std::time::Duration,
}

impl SerpBatchCollector {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Arc<SearchProviderClient>,
        serp_dao: SerpDao,
        keyword_dao: KeywordDao,
        state_tracker: Arc<StateTracker>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryManager>,
        events: Arc<EventHub>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            serp_dao,
            keyword_dao,
            state_tracker,
            breaker,
            retry,
            events,
            max_results_per_type: config.serp_max_results_per_type(),
            monitor_interval: config.serp_batch_monitor_interval(),
            batch_timeout: config.serp_batch_timeout(),
        }
    }

    /// Create and start a provider batch, returning immediately with its id.
    /// Content-type batches are created in parallel by the caller and then
    /// monitored concurrently.
    pub(crate) async fn create_batch_only(
        &self,
        run_id: Uuid,
        kind: SerpKind,
        keywords: &[String],
        regions: &[String],
        schedule: &BatchSchedule,
        is_initial_run: bool,
    ) -> Result<Option<BatchHandle>> {
        if keywords.is_empty() {
            warn!(kind = kind.as_str(), "no keywords for serp batch");
            return Ok(None);
        }

        let searches = self.build_searches(kind, keywords, regions, schedule, is_initial_run);
        info!(
            kind = kind.as_str(),
            keywords = keywords.len(),
            regions = regions.len(),
            searches = searches.len(),
            "creating serp batch"
        );

        let items: Vec<WorkItem> = keywords
            .iter()
            .flat_map(|keyword| {
                regions.iter().map(move |region| WorkItem::SerpSearch {
                    keyword: keyword.clone(),
                    region: region.clone(),
                    kind,
                })
            })
            .collect();
        self.state_tracker
            .initialize(run_id, "serp_collection", &items)
            .await?;

        let name = format!("dsi {} batch {}", kind.as_str(), run_id);
        let client = Arc::clone(&self.client);
        let breaker = Arc::clone(&self.breaker);
        let batch_id = self
            .retry
            .retry_with_backoff(
                || {
                    let client = Arc::clone(&client);
                    let breaker = Arc::clone(&breaker);
                    let name = name.clone();
                    let schedule = schedule.clone();
                    async move {
                        breaker
                            .call(|| async { client.create_batch(&name, &schedule).await })
                            .await
                    }
                },
                "serp_batch_create",
                &format!("{run_id}:{}", kind.as_str()),
                None,
            )
            .await?;

        self.provider_call(&format!("add:{batch_id}"), || {
            let client = Arc::clone(&self.client);
            let batch_id = batch_id.clone();
            let searches = searches.clone();
            async move { client.add_searches(&batch_id, &searches).await.map(|_| ()) }
        })
        .await?;

        self.provider_call(&format!("start:{batch_id}"), || {
            let client = Arc::clone(&self.client);
            let batch_id = batch_id.clone();
            async move { client.start_batch(&batch_id).await }
        })
        .await?;

        self.events
            .progress(
                run_id,
                "serp_batch_started",
                json!({
                    "batch_id": batch_id,
                    "content_type": kind.as_str(),
                    "searches_added": searches.len(),
                }),
            )
            .await;

        Ok(Some(BatchHandle {
            batch_id,
            kind,
            searches_total: searches.len(),
        }))
    }

    /// Poll a batch until its results are downloadable, then ingest them.
    pub(crate) async fn monitor_batch(
        &self,
        run_id: Uuid,
        handle: &BatchHandle,
    ) -> Result<IngestOutcome> {
        info!(
            batch_id = %handle.batch_id,
            kind = handle.kind.as_str(),
            interval_secs = self.monitor_interval.as_secs(),
            timeout_secs = self.batch_timeout.as_secs(),
            "monitoring serp batch"
        );

        // A resumed run whose batch already finished ingesting skips the
        // poll loop entirely.
        if let Some(checkpoint) = self
            .state_tracker
            .get_checkpoint(
                run_id,
                "serp_collection",
                &format!("storage_{}", handle.kind.as_str()),
            )
            .await?
        {
            let stored = checkpoint
                .get("stored")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            if stored > 0 {
                info!(
                    batch_id = %handle.batch_id,
                    stored,
                    "batch already ingested per checkpoint, skipping monitor"
                );
                return Ok(IngestOutcome {
                    stored: stored as usize,
                    failed: checkpoint
                        .get("failed")
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0) as usize,
                    keywords_processed: 0,
                });
            }
        }

        self.state_tracker
            .checkpoint(
                run_id,
                "serp_collection",
                &format!("monitoring_{}", handle.kind.as_str()),
                &json!({"batch_id": handle.batch_id, "searches_total": handle.searches_total}),
            )
            .await?;

        let started = Utc::now();
        let mut consecutive_errors = 0;

        loop {
            let elapsed = (Utc::now() - started)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            if elapsed >= self.batch_timeout {
                error!(batch_id = %handle.batch_id, "serp batch monitoring timed out");
                return Err(anyhow!(
                    "batch {} monitoring timed out after {} minutes",
                    handle.batch_id,
                    self.batch_timeout.as_secs() / 60
                ));
            }

            let listing = match self
                .provider_call_value(&format!("results:{}", handle.batch_id), || {
                    let client = Arc::clone(&self.client);
                    let batch_id = handle.batch_id.clone();
                    async move { client.list_result_sets(&batch_id).await }
                })
                .await
            {
                Ok(listing) => {
                    consecutive_errors = 0;
                    listing
                }
                Err(err) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= 3 {
                        return Err(err.context("batch monitoring failed repeatedly"));
                    }
                    warn!(batch_id = %handle.batch_id, error = %err, "monitor poll failed, retrying");
                    sleep(self.monitor_interval).await;
                    continue;
                }
            };

            self.events
                .progress(
                    run_id,
                    "serp_batch_progress",
                    json!({
                        "batch_id": handle.batch_id,
                        "status": listing.status,
                        "results_count": listing.results_count,
                        "searches_completed": listing.searches_completed,
                        "searches_total": listing.searches_total,
                    }),
                )
                .await;

            if listing.status == "failed" {
                return Err(anyhow!("batch {} failed at the provider", handle.batch_id));
            }

            if listing.status == "idle" && listing.results_count > 0 {
                let newest = listing
                    .result_sets
                    .first()
                    .ok_or_else(|| anyhow!("idle batch reported no result sets"))?;
                info!(
                    batch_id = %handle.batch_id,
                    result_set_id = newest.id,
                    searches_completed = newest.searches_completed,
                    searches_failed = newest.searches_failed,
                    "batch result set ready"
                );

                let links = self
                    .provider_call_value(&format!("links:{}", handle.batch_id), || {
                        let client = Arc::clone(&self.client);
                        let batch_id = handle.batch_id.clone();
                        let result_set_id = newest.id;
                        async move { client.download_links(&batch_id, result_set_id).await }
                    })
                    .await?;

                let search_date = newest
                    .ended_at
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc).date_naive());

                return self
                    .ingest_download_links(run_id, handle.kind, &links, search_date)
                    .await;
            }

            sleep(self.monitor_interval).await;
        }
    }

    /// Webhook-driven ingest path: same storage pipeline, driven by pushed
    /// download links instead of polling.
    pub(crate) async fn process_webhook_batch(
        &self,
        run_id: Uuid,
        batch_id: &str,
        kind: SerpKind,
        result_set_id: Option<i64>,
        links: Option<DownloadLinks>,
    ) -> Result<IngestOutcome> {
        info!(batch_id, kind = kind.as_str(), "processing webhook batch");

        let links = match links {
            Some(links) if !(links.csv_pages.is_empty() && links.json_pages.is_empty()) => links,
            _ => {
                let result_set_id = match result_set_id {
                    Some(id) => id,
                    None => {
                        let listing = self
                            .provider_call_value(&format!("results:{batch_id}"), || {
                                let client = Arc::clone(&self.client);
                                let batch_id = batch_id.to_string();
                                async move { client.list_result_sets(&batch_id).await }
                            })
                            .await?;
                        listing
                            .result_sets
                            .first()
                            .map(|meta| meta.id)
                            .ok_or_else(|| anyhow!("webhook batch has no result sets"))?
                    }
                };

                self.provider_call_value(&format!("links:{batch_id}"), || {
                    let client = Arc::clone(&self.client);
                    let batch_id = batch_id.to_string();
                    async move { client.download_links(&batch_id, result_set_id).await }
                })
                .await?
            }
        };

        self.ingest_download_links(run_id, kind, &links, None).await
    }

    async fn ingest_download_links(
        &self,
        run_id: Uuid,
        kind: SerpKind,
        links: &DownloadLinks,
        search_date: Option<NaiveDate>,
    ) -> Result<IngestOutcome> {
        let now = Utc::now();
        let mut parsed = Vec::new();

        // CSV preferred; JSON is the fallback for content types that don't
        // expose CSV downloads.
        if links.csv_pages.is_empty() {
            for page_url in &links.json_pages {
                let body = self.download_page(page_url).await?;
                parsed.extend(parse_json_page(&body, kind, now));
            }
        } else {
            for page_url in &links.csv_pages {
                let body = self.download_page(page_url).await?;
                parsed.extend(parse_csv_page(&body, kind, now));
            }
        }

        info!(
            kind = kind.as_str(),
            rows = parsed.len(),
            "parsed serp result pages"
        );

        let outcome = self
            .store_parsed(run_id, kind, parsed, search_date.unwrap_or_else(|| now.date_naive()))
            .await?;

        self.state_tracker
            .checkpoint(
                run_id,
                "serp_collection",
                &format!("storage_{}", kind.as_str()),
                &json!({"stored": outcome.stored, "failed": outcome.failed}),
            )
            .await?;

        self.events
            .progress(
                run_id,
                "serp_storage_completed",
                json!({
                    "content_type": kind.as_str(),
                    "stored": outcome.stored,
                    "failed": outcome.failed,
                }),
            )
            .await;

        Ok(outcome)
    }

    async fn store_parsed(
        &self,
        run_id: Uuid,
        kind: SerpKind,
        parsed: Vec<ParsedResult>,
        search_date: NaiveDate,
    ) -> Result<IngestOutcome> {
        let mut keyword_cache: HashMap<String, Option<Keyword>> = HashMap::new();
        let mut outcome = IngestOutcome::default();
        let mut seen_keywords: std::collections::HashSet<String> = std::collections::HashSet::new();

        // Cap per (keyword, location) at the configured maximum per type.
        let mut per_search_counts: HashMap<(String, String), u32> = HashMap::new();

        for result in parsed {
            let key = (result.keyword.clone(), result.location.clone());
            let count = per_search_counts.entry(key).or_insert(0);
            if *count >= self.max_results_per_type {
                continue;
            }

            let keyword = match keyword_cache.get(&result.keyword) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.keyword_dao.get_by_text(&result.keyword).await?;
                    keyword_cache.insert(result.keyword.clone(), fetched.clone());
                    fetched
                }
            };

            let Some(keyword) = keyword else {
                warn!(keyword = %result.keyword, "serp keyword not registered, skipping row");
                outcome.failed += 1;
                continue;
            };

            let record = SerpRecord {
                keyword_id: keyword.id,
                search_date,
                location: result.location.clone(),
                kind,
                position: result.position,
                url: result.url.clone(),
                title: result.title.clone(),
                snippet: result.snippet.clone(),
                domain: result.domain.clone(),
                source: result.source.clone(),
                published_date: result.published_date,
                video_length: result.video_length.clone(),
                total_results: result.total_results,
                device: result.device.clone(),
            };

            match self.serp_dao.upsert_result(&record, run_id).await {
                Ok(()) => {
                    *count += 1;
                    outcome.stored += 1;
                    seen_keywords.insert(result.keyword);
                }
                Err(err) => {
                    warn!(url = %record.url, error = %err, "failed to store serp result");
                    outcome.failed += 1;
                }
            }
        }

        outcome.keywords_processed = seen_keywords.len();

        // Mark the per-search tracking items that produced rows, so a
        // partial failure can be retried at search granularity.
        let pending = self
            .state_tracker
            .get_pending(run_id, "serp_collection", i64::MAX)
            .await?;
        for item in pending {
            let Some((keyword_region, item_kind)) = item.item_identifier.rsplit_once(':') else {
                continue;
            };
            if item_kind != kind.as_str() {
                continue;
            }
            let Some((keyword, region)) = keyword_region.rsplit_once(':') else {
                continue;
            };
            let key = (keyword.to_string(), region.to_string());
            if per_search_counts.get(&key).copied().unwrap_or(0) > 0 {
                let _ = self.state_tracker.mark_processing(item.id).await;
                let _ = self.state_tracker.mark_completed(item.id, None).await;
            }
        }

        info!(
            kind = kind.as_str(),
            stored = outcome.stored,
            failed = outcome.failed,
            "serp batch storage complete"
        );
        Ok(outcome)
    }

    fn build_searches(
        &self,
        kind: SerpKind,
        keywords: &[String],
        regions: &[String],
        schedule: &BatchSchedule,
        is_initial_run: bool,
    ) -> Vec<BatchSearch> {
        let news_time_period = if is_initial_run {
            schedule.frequency.initial_news_time_period()
        } else {
            schedule.frequency.news_time_period()
        };

        let mut searches = Vec::with_capacity(keywords.len() * regions.len());
        for keyword in keywords {
            for region in regions {
                let (q, search_type, time_period) = match kind {
                    SerpKind::Organic => (keyword.clone(), None, None),
                    SerpKind::News => (
                        keyword.clone(),
                        Some("news".to_string()),
                        Some(news_time_period.to_string()),
                    ),
                    SerpKind::Video => (
                        format!("{keyword} site:youtube.com"),
                        Some("videos".to_string()),
                        None,
                    ),
                };

                searches.push(BatchSearch {
                    q,
                    location: location_name(region),
                    gl: region.to_lowercase(),
                    hl: "en".to_string(),
                    device: "desktop".to_string(),
                    num: self.max_results_per_type,
                    output: "json".to_string(),
                    custom_id: format!("{keyword}_{region}_{}", kind.as_str()),
                    search_type,
                    time_period,
                });
            }
        }
        searches
    }

    async fn provider_call<F, Fut>(&self, entity_id: &str, operation: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.provider_call_value(entity_id, operation).await
    }

    async fn provider_call_value<F, Fut, T>(&self, entity_id: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.retry
            .retry_with_backoff(
                || self.breaker.call(&operation),
                "serp_provider",
                entity_id,
                None,
            )
            .await
    }

    async fn download_page(&self, page_url: &str) -> Result<String> {
        self.provider_call_value(&format!("download:{page_url}"), || {
            let client = Arc::clone(&self.client);
            let page_url = page_url.to_string();
            async move { client.download_page(&page_url).await }
        })
        .await
        .context("failed to download result page")
    }
}

/// Region code to provider location name.
#[must_use]
pub(crate) fn location_name(region: &str) -> String {
    match region.to_uppercase().as_str() {
        "US" => "United States",
        "UK" => "United Kingdom",
        "CA" => "Canada",
        "AU" => "Australia",
        "DE" => "Germany",
        "FR" => "France",
        "IT" => "Italy",
        "ES" => "Spain",
        "NL" => "Netherlands",
        "SE" => "Sweden",
        other => return other.to_string(),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::search::ScheduleFrequency;

    #[test]
    fn location_names_map_known_regions() {
        assert_eq!(location_name("US"), "United States");
        assert_eq!(location_name("uk"), "United Kingdom");
        assert_eq!(location_name("JP"), "JP");
    }

    #[test]
    fn frequency_mapping_for_scheduled_news() {
        // Steady state vs first run of a schedule.
        assert_eq!(ScheduleFrequency::Weekly.news_time_period(), "last_week");
        assert_eq!(
            ScheduleFrequency::Weekly.initial_news_time_period(),
            "last_month"
        );
    }
}
