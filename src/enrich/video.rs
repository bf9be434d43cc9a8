/// Video enrichment: id extraction, provider batches of 50, daily quota.
///
/// On quota exhaustion the worker continues with cached snapshots and
/// records the condition as a non-fatal QUOTA_EXCEEDED error.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::video::{ID_BATCH_SIZE, VideoApiClient, VideoItem};
use crate::robustness::circuit_breaker::CircuitBreaker;
use crate::robustness::retry::RetryManager;
use crate::robustness::state_tracker::{StateTracker, WorkItem};
use crate::store::dao::video::VideoDao;
use crate::store::models::VideoSnapshot;

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"youtube\.com/watch\?v=([a-zA-Z0-9_-]+)",
        r"youtu\.be/([a-zA-Z0-9_-]+)",
        r"youtube\.com/embed/([a-zA-Z0-9_-]+)",
        r"youtube\.com/v/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid video id regex"))
    .collect()
});

/// Extract the platform video id from a result URL.
#[must_use]
pub(crate) fn extract_video_id(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    for pattern in VIDEO_ID_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(url) {
            return captures.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

/// Daily quota with reset on UTC day rollover.
pub(crate) struct QuotaManager {
    daily_limit: u64,
    state: Mutex<QuotaState>,
}

struct QuotaState {
    used_today: u64,
    last_reset: NaiveDate,
    operations: HashMap<String, u64>,
}

impl QuotaManager {
    pub(crate) fn new(daily_limit: u64) -> Self {
        Self {
            daily_limit,
            state: Mutex::new(QuotaState {
                used_today: 0,
                last_reset: Utc::now().date_naive(),
                operations: HashMap::new(),
            }),
        }
    }

    pub(crate) async fn check(&self, units: u64) -> bool {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state);
        state.used_today + units <= self.daily_limit
    }

    pub(crate) async fn consume(&self, operation: &str, units: u64) {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state);
        state.used_today += units;
        *state.operations.entry(operation.to_string()).or_insert(0) += units;
        info!(
            used = state.used_today,
            limit = self.daily_limit,
            operation,
            "video quota consumed"
        );
    }

    pub(crate) async fn remaining(&self) -> u64 {
        let mut state = self.state.lock().await;
        Self::roll_day(&mut state);
        self.daily_limit.saturating_sub(state.used_today)
    }

    fn roll_day(state: &mut QuotaState) {
        let today = Utc::now().date_naive();
        if today > state.last_reset {
            state.used_today = 0;
            state.operations.clear();
            state.last_reset = today;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct VideoEnrichmentOutcome {
    pub(crate) total_videos: usize,
    pub(crate) enriched: usize,
    pub(crate) cached: usize,
    pub(crate) failed: usize,
    pub(crate) quota_used: u64,
    pub(crate) errors: Vec<String>,
}

impl VideoEnrichmentOutcome {
    pub(crate) fn success_rate(&self) -> f64 {
        if self.total_videos == 0 {
            return 100.0;
        }
        ((self.enriched + self.cached) as f64 / self.total_videos as f64) * 100.0
    }
}

pub(crate) struct VideoEnricher {
    api: Arc<VideoApiClient>,
    dao: VideoDao,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryManager>,
    state_tracker: Arc<StateTracker>,
    quota: QuotaManager,
}

impl VideoEnricher {
    pub(crate) fn new(
        api: Arc<VideoApiClient>,
        dao: VideoDao,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryManager>,
        state_tracker: Arc<StateTracker>,
        daily_quota_units: u64,
    ) -> Self {
        Self {
            api,
            dao,
            breaker,
            retry,
            state_tracker,
            quota: QuotaManager::new(daily_quota_units),
        }
    }

    pub(crate) async fn enrich_videos(
        &self,
        run_id: Uuid,
        video_urls: &[String],
    ) -> Result<VideoEnrichmentOutcome> {
        // video_id -> url; first occurrence wins.
        let mut id_to_url: HashMap<String, String> = HashMap::new();
        for url in video_urls {
            if let Some(video_id) = extract_video_id(url) {
                id_to_url.entry(video_id).or_insert_with(|| url.clone());
            }
        }

        let mut outcome = VideoEnrichmentOutcome {
            total_videos: id_to_url.len(),
            ..VideoEnrichmentOutcome::default()
        };

        if id_to_url.is_empty() {
            return Ok(outcome);
        }

        let items: Vec<WorkItem> = id_to_url
            .iter()
            .map(|(video_id, url)| WorkItem::Video {
                url: Some(url.clone()),
                video_id: Some(video_id.clone()),
            })
            .collect();
        self.state_tracker
            .initialize(run_id, "youtube_enrichment", &items)
            .await?;

        info!(videos = id_to_url.len(), "video enrichment starting");

        // Cached snapshots first, so quota is spent only on unknown videos.
        let mut uncached: Vec<String> = Vec::new();
        let mut snapshots: Vec<VideoSnapshot> = Vec::new();
        let today = Utc::now().date_naive();

        for (video_id, url) in &id_to_url {
            match self.dao.latest_snapshot(video_id).await? {
                Some(mut cached) => {
                    cached.snapshot_date = today;
                    cached.video_url.clone_from(url);
                    snapshots.push(cached);
                    outcome.cached += 1;
                }
                None => uncached.push(video_id.clone()),
            }
        }

        for batch in uncached.chunks(ID_BATCH_SIZE) {
            if !self.quota.check(batch.len() as u64).await {
                let remaining = self.quota.remaining().await;
                let message = format!(
                    "daily video quota exhausted, {remaining} units remaining; \
                     {} videos left unenriched",
                    batch.len()
                );
                warn!(%message);
                outcome.errors.push(message.clone());
                self.mark_quota_failures(run_id, batch, &id_to_url, &message).await;
                outcome.failed += batch.len();
                continue;
            }

            let fetched = self.fetch_batch(batch).await;
            match fetched {
                Ok(videos) => {
                    self.quota.consume("videos.list", batch.len() as u64).await;
                    outcome.quota_used += batch.len() as u64;

                    let found: std::collections::HashSet<&str> =
                        videos.iter().map(|v| v.video_id.as_str()).collect();
                    for missing in batch.iter().filter(|id| !found.contains(id.as_str())) {
                        outcome.failed += 1;
                        self.mark_item_failed(run_id, missing, &id_to_url, "video not found", "NOT_FOUND")
                            .await;
                    }

                    for video in videos {
                        let url = id_to_url
                            .get(&video.video_id)
                            .cloned()
                            .unwrap_or_else(|| {
                                format!("https://www.youtube.com/watch?v={}", video.video_id)
                            });
                        snapshots.push(to_snapshot(&video, url, today));
                        outcome.enriched += 1;
                    }
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(error = %message, "video batch fetch failed");
                    outcome.errors.push(message.clone());
                    outcome.failed += batch.len();
                    self.mark_quota_failures(run_id, batch, &id_to_url, &message).await;
                }
            }
        }

        // Subscriber counts come from a separate channel listing, batched
        // the same way and subject to the same quota.
        self.enrich_with_channel_data(&mut snapshots, &mut outcome)
            .await;

        for snapshot in &snapshots {
            if let Err(err) = self.dao.upsert_snapshot(snapshot).await {
                warn!(video_id = %snapshot.video_id, error = %err, "failed to store snapshot");
                outcome.errors.push(format!("{}: {err:#}", snapshot.video_id));
            } else if let Some(state_id) = self
                .state_id_for(run_id, &id_to_url, &snapshot.video_id)
                .await
            {
                let _ = self.state_tracker.mark_processing(state_id).await;
                let _ = self.state_tracker.mark_completed(state_id, None).await;
            }
        }

        info!(
            enriched = outcome.enriched,
            cached = outcome.cached,
            failed = outcome.failed,
            quota_used = outcome.quota_used,
            "video enrichment finished"
        );
        Ok(outcome)
    }

    async fn fetch_batch(&self, batch: &[String]) -> Result<Vec<VideoItem>> {
        let api = Arc::clone(&self.api);
        let ids: Vec<String> = batch.to_vec();
        self.retry
            .retry_with_backoff(
                || {
                    let api = Arc::clone(&api);
                    let ids = ids.clone();
                    self.breaker
                        .call(move || async move { api.list_videos(&ids).await })
                },
                "video_enrichment",
                &format!("batch:{}", batch.first().map(String::as_str).unwrap_or("")),
                None,
            )
            .await
    }

    async fn enrich_with_channel_data(
        &self,
        snapshots: &mut [VideoSnapshot],
        outcome: &mut VideoEnrichmentOutcome,
    ) {
        let channel_ids: Vec<String> = snapshots
            .iter()
            .filter(|s| !s.channel_id.is_empty())
            .map(|s| s.channel_id.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        if channel_ids.is_empty() || !self.quota.check(channel_ids.len() as u64).await {
            return;
        }

        let mut subscriber_counts: HashMap<String, i64> = HashMap::new();
        for batch in channel_ids.chunks(ID_BATCH_SIZE) {
            let api = Arc::clone(&self.api);
            let ids: Vec<String> = batch.to_vec();
            let fetched = self
                .retry
                .retry_with_backoff(
                    || {
                        let api = Arc::clone(&api);
                        let ids = ids.clone();
                        self.breaker
                            .call(move || async move { api.list_channels(&ids).await })
                    },
                    "video_enrichment",
                    "channels",
                    None,
                )
                .await;

            match fetched {
                Ok(channels) => {
                    self.quota.consume("channels.list", batch.len() as u64).await;
                    outcome.quota_used += batch.len() as u64;
                    for channel in channels {
                        subscriber_counts.insert(channel.channel_id, channel.subscriber_count);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "channel data fetch failed");
                    outcome.errors.push(format!("channel fetch: {err:#}"));
                }
            }
        }

        for snapshot in snapshots {
            if let Some(count) = subscriber_counts.get(&snapshot.channel_id) {
                snapshot.subscriber_count = *count;
            }
        }
    }

    async fn mark_quota_failures(
        &self,
        run_id: Uuid,
        batch: &[String],
        id_to_url: &HashMap<String, String>,
        message: &str,
    ) {
        for video_id in batch {
            self.mark_item_failed(run_id, video_id, id_to_url, message, "QUOTA_EXCEEDED")
                .await;
        }
    }

    async fn mark_item_failed(
        &self,
        run_id: Uuid,
        video_id: &str,
        id_to_url: &HashMap<String, String>,
        message: &str,
        category: &str,
    ) {
        if let Some(state_id) = self.state_id_for(run_id, id_to_url, video_id).await {
            let _ = self.state_tracker.mark_processing(state_id).await;
            let _ = self
                .state_tracker
                .mark_failed(state_id, message, Some(category))
                .await;
        }
    }

    async fn state_id_for(
        &self,
        run_id: Uuid,
        id_to_url: &HashMap<String, String>,
        video_id: &str,
    ) -> Option<Uuid> {
        let identifier = id_to_url.get(video_id)?.clone();
        let pending = self
            .state_tracker
            .get_pending(run_id, "youtube_enrichment", i64::MAX)
            .await
            .ok()?;
        pending
            .into_iter()
            .find(|item| item.item_identifier == identifier)
            .map(|item| item.id)
    }
}

fn to_snapshot(video: &VideoItem, url: String, snapshot_date: NaiveDate) -> VideoSnapshot {
    VideoSnapshot {
        snapshot_date,
        video_id: video.video_id.clone(),
        video_url: url,
        video_title: video.title.clone(),
        channel_id: video.channel_id.clone(),
        channel_title: video.channel_title.clone(),
        published_at: video.published_at,
        view_count: video.view_count,
        like_count: video.like_count,
        comment_count: video.comment_count,
        subscriber_count: 0,
        engagement_rate: video.engagement_rate(),
        duration_seconds: video.duration_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_from_known_url_shapes() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://youtu.be/abc_-123").as_deref(),
            Some("abc_-123")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/xyz789").as_deref(),
            Some("xyz789")
        );
        assert_eq!(extract_video_id("https://vimeo.com/12345"), None);
        assert_eq!(extract_video_id(""), None);
    }

    #[tokio::test]
    async fn quota_enforces_daily_limit() {
        let quota = QuotaManager::new(50);
        assert!(quota.check(50).await);
        quota.consume("videos.list", 50).await;
        assert!(!quota.check(10).await);
        assert_eq!(quota.remaining().await, 0);
    }

    #[test]
    fn success_rate_counts_cached_hits() {
        let outcome = VideoEnrichmentOutcome {
            total_videos: 10,
            enriched: 5,
            cached: 3,
            failed: 2,
            ..VideoEnrichmentOutcome::default()
        };
        assert!((outcome.success_rate() - 80.0).abs() < f64::EPSILON);

        let empty = VideoEnrichmentOutcome::default();
        assert!((empty.success_rate() - 100.0).abs() < f64::EPSILON);
    }
}
