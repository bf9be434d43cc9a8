/// Web scraper: organic/news URLs fan out under a semaphore; protected
/// domains go through the headless browser path; everything is persisted,
/// including failures, so the analyzer can tell "failed attempt" from "not
/// attempted".
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::browser::BrowserClient;
use crate::robustness::state_tracker::{StateTracker, WorkItem};
use crate::store::dao::content::ContentDao;
use crate::store::models::{ScrapeStatus, ScrapedPage};
use crate::util::domain::{domain_of_url, normalize_url};
use crate::util::json::truncate_error;
use crate::util::retry::{RetryConfig, is_retryable_error};

/// Domains that block plain fetches and require a rendered-browser path.
const PROTECTED_DOMAINS: &[&str] = &[
    "linkedin.com",
    "facebook.com",
    "instagram.com",
    "x.com",
    "twitter.com",
    "glassdoor.com",
];

/// Content shorter than this is treated as a failed scrape even when the
/// fetch itself succeeded.
pub(crate) const MIN_CONTENT_CHARS: usize = 100;

#[derive(Debug, Clone, Default)]
pub(crate) struct ScrapeOutcome {
    pub(crate) urls_total: usize,
    pub(crate) urls_candidates: usize,
    pub(crate) urls_scraped: usize,
    pub(crate) urls_failed: usize,
    pub(crate) urls_reused: usize,
    pub(crate) errors: Vec<String>,
}

pub(crate) struct WebScraper {
    http: Client,
    browser: Option<Arc<BrowserClient>>,
    dao: ContentDao,
    state_tracker: Arc<StateTracker>,
    semaphore: Arc<Semaphore>,
}

impl WebScraper {
    pub(crate) fn new(
        browser: Option<Arc<BrowserClient>>,
        dao: ContentDao,
        state_tracker: Arc<StateTracker>,
        concurrency: usize,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; dsi-worker/0.1)")
            .gzip(true)
            .build()
            .context("failed to build scraper HTTP client")?;

        Ok(Self {
            http,
            browser,
            dao,
            state_tracker,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    pub(crate) async fn scrape_urls(
        self: &Arc<Self>,
        run_id: Uuid,
        urls: &[String],
    ) -> Result<ScrapeOutcome> {
        let mut outcome = ScrapeOutcome {
            urls_total: urls.len(),
            ..ScrapeOutcome::default()
        };

        // Normalize and dedupe.
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for url in urls {
            if let Some(normalized) = normalize_url(url) {
                if seen.insert(normalized.clone()) {
                    candidates.push(normalized);
                }
            }
        }

        // Skip URLs scraped by any earlier run; back-fill this run's id so
        // downstream queries see them.
        let already = self.dao.already_scraped(&candidates).await?;
        let already: HashSet<&String> = already.iter().collect();
        let reused: Vec<String> = candidates
            .iter()
            .filter(|url| already.contains(url))
            .cloned()
            .collect();
        if !reused.is_empty() {
            self.dao.attach_run(&reused, run_id).await?;
            outcome.urls_reused = reused.len();
        }

        let to_scrape: Vec<String> = candidates
            .into_iter()
            .filter(|url| !already.contains(url))
            .collect();
        outcome.urls_candidates = to_scrape.len();

        info!(
            total = outcome.urls_total,
            candidates = outcome.urls_candidates,
            reused = outcome.urls_reused,
            "content scraping starting"
        );

        let items: Vec<WorkItem> = to_scrape.iter().cloned().map(WorkItem::Url).collect();
        self.state_tracker
            .initialize(run_id, "content_scraping", &items)
            .await?;
        let pending = self
            .state_tracker
            .get_pending(run_id, "content_scraping", i64::MAX)
            .await?;
        let state_ids: std::collections::HashMap<String, Uuid> = pending
            .into_iter()
            .map(|item| (item.item_identifier, item.id))
            .collect();

        let mut tasks = FuturesUnordered::new();
        for url in to_scrape {
            let scraper = Arc::clone(self);
            tasks.push(async move {
                let _permit = scraper.semaphore.acquire().await;
                let page = scraper.scrape_one(&url).await;
                (url, page)
            });
        }

        while let Some((url, page)) = tasks.next().await {
            let state_id = state_ids.get(&url).copied();
            if let Some(state_id) = state_id {
                let _ = self.state_tracker.mark_processing(state_id).await;
            }

            match page {
                Ok(page) => {
                    let scraped_ok = page.status == ScrapeStatus::Completed;
                    if let Err(err) = self.dao.upsert_scraped(&page, run_id).await {
                        warn!(url = %url, error = %err, "failed to store scraped page");
                        outcome.urls_failed += 1;
                        outcome.errors.push(format!("{url}: {err:#}"));
                        continue;
                    }

                    if scraped_ok {
                        outcome.urls_scraped += 1;
                        if let Some(state_id) = state_id {
                            let _ = self.state_tracker.mark_completed(state_id, None).await;
                        }
                    } else {
                        outcome.urls_failed += 1;
                        if let Some(state_id) = state_id {
                            let _ = self
                                .state_tracker
                                .mark_failed(
                                    state_id,
                                    page.error_message.as_deref().unwrap_or("scrape failed"),
                                    None,
                                )
                                .await;
                        }
                    }
                }
                Err(err) => {
                    // Persist the failure so the attempt is visible.
                    let message = truncate_error(&format!("{err:#}"));
                    let page = ScrapedPage {
                        url: url.clone(),
                        domain: domain_of_url(&url),
                        title: None,
                        content: None,
                        html: None,
                        word_count: 0,
                        status: ScrapeStatus::Failed,
                        error_message: Some(message.clone()),
                    };
                    let _ = self.dao.upsert_scraped(&page, run_id).await;
                    outcome.urls_failed += 1;
                    outcome.errors.push(format!("{url}: {message}"));
                    if let Some(state_id) = state_id {
                        let _ = self.state_tracker.mark_failed(state_id, &message, None).await;
                    }
                }
            }
        }

        info!(
            scraped = outcome.urls_scraped,
            failed = outcome.urls_failed,
            reused = outcome.urls_reused,
            "content scraping finished"
        );
        Ok(outcome)
    }

    async fn scrape_one(&self, url: &str) -> Result<ScrapedPage> {
        let domain = domain_of_url(url);

        let html = if is_protected_domain(&domain) {
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| anyhow!("protected domain {domain} requires a browser client"))?;
            browser.content(url).await?
        } else {
            self.fetch_with_retry(url).await?
        };

        let (title, text) = extract_text(&html);
        let word_count = text.split_whitespace().count() as i32;

        debug!(url, chars = text.len(), word_count, "page scraped");

        if text.len() < MIN_CONTENT_CHARS {
            return Ok(ScrapedPage {
                url: url.to_string(),
                domain,
                title,
                content: Some(text),
                html: None,
                word_count,
                status: ScrapeStatus::Failed,
                error_message: Some(format!(
                    "content below quality gate ({MIN_CONTENT_CHARS} chars)"
                )),
            });
        }

        Ok(ScrapedPage {
            url: url.to_string(),
            domain,
            title,
            content: Some(text),
            html: Some(html),
            word_count,
            status: ScrapeStatus::Completed,
            error_message: None,
        })
    }

    /// Plain fetch with cheap client-level retries on transient failures.
    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        let retry = RetryConfig::default();
        let mut attempt = 0;

        loop {
            let result = async {
                self.http
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            }
            .await;

            match result {
                Ok(body) => return Ok(body),
                Err(err) if is_retryable_error(&err) && retry.can_retry(attempt + 1) => {
                    attempt += 1;
                    debug!(url, attempt, error = %err, "retrying transient fetch failure");
                    tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                }
                Err(err) => return Err(err).context("page fetch failed"),
            }
        }
    }
}

#[must_use]
pub(crate) fn is_protected_domain(domain: &str) -> bool {
    PROTECTED_DOMAINS
        .iter()
        .any(|protected| domain == *protected || domain.ends_with(&format!(".{protected}")))
}

/// Sanitize the HTML and extract readable text plus the `<title>`.
#[must_use]
pub(crate) fn extract_text(html: &str) -> (Option<String>, String) {
    let title = html
        .find("<title")
        .and_then(|start| {
            let rest = &html[start..];
            let open_end = rest.find('>')?;
            let close = rest.find("</title>")?;
            (close > open_end).then(|| rest[open_end + 1..close].trim().to_string())
        })
        .filter(|title| !title.is_empty());

    let sanitized = ammonia::clean(html);
    let text = html2text::from_read(sanitized.as_bytes(), 200)
        .unwrap_or_default()
        .trim()
        .to_string();

    (title, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_domains_match_subdomains() {
        assert!(is_protected_domain("linkedin.com"));
        assert!(is_protected_domain("www.linkedin.com"));
        assert!(!is_protected_domain("linkedin.com.evil.io"));
        assert!(!is_protected_domain("example.com"));
    }

    #[test]
    fn extract_text_pulls_title_and_body() {
        let html = "<html><head><title>Pricing Guide</title></head>\
                    <body><h1>Plans</h1><p>Choose a plan that fits.</p></body></html>";
        let (title, text) = extract_text(html);
        assert_eq!(title.as_deref(), Some("Pricing Guide"));
        assert!(text.contains("Choose a plan"));
    }

    #[test]
    fn extract_text_handles_missing_title() {
        let (title, text) = extract_text("<p>short</p>");
        assert!(title.is_none());
        assert!(text.contains("short"));
    }

    #[test]
    fn quality_gate_threshold_is_100_chars() {
        assert_eq!(MIN_CONTENT_CHARS, 100);
    }
}
