/// Video platform client: videos and channels listed in id batches of at
/// most 50, the provider's hard cap.
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub(crate) const ID_BATCH_SIZE: usize = 50;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").expect("valid duration regex")
});

#[derive(Debug, Clone)]
pub(crate) struct VideoItem {
    pub(crate) video_id: String,
    pub(crate) title: String,
    #[allow(dead_code)]
    pub(crate) description: String,
    pub(crate) channel_id: String,
    pub(crate) channel_title: String,
    pub(crate) published_at: Option<DateTime<Utc>>,
    pub(crate) view_count: i64,
    pub(crate) like_count: i64,
    pub(crate) comment_count: i64,
    pub(crate) duration_seconds: i32,
}

impl VideoItem {
    /// Likes plus comments per view, as a percentage.
    pub(crate) fn engagement_rate(&self) -> f64 {
        if self.view_count == 0 {
            return 0.0;
        }
        let engaged = (self.like_count + self.comment_count) as f64;
        (engaged / self.view_count as f64 * 100.0 * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelItem {
    pub(crate) channel_id: String,
    #[allow(dead_code)]
    pub(crate) title: String,
    #[allow(dead_code)]
    pub(crate) description: String,
    pub(crate) subscriber_count: i64,
}

pub(crate) struct VideoApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VideoApiClient {
    pub(crate) fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build video API client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
        })
    }

    #[allow(dead_code)]
    pub(crate) fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("video API key not configured"))
    }

    /// Statistics for one batch of at most 50 video ids.
    pub(crate) async fn list_videos(&self, video_ids: &[String]) -> Result<Vec<VideoItem>> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        if video_ids.len() > ID_BATCH_SIZE {
            return Err(anyhow!(
                "video id batch exceeds provider limit of {ID_BATCH_SIZE}"
            ));
        }

        let url = format!("{}/videos", self.base_url);
        debug!(count = video_ids.len(), "video list request");

        let body: Value = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,statistics,contentDetails"),
                ("id", &video_ids.join(",")),
                ("key", self.api_key()?),
            ])
            .send()
            .await
            .context("video list request failed")?
            .error_for_status()
            .context("video list returned error status")?
            .json()
            .await
            .context("failed to decode video list response")?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items.iter().filter_map(parse_video_item).collect())
    }

    /// Statistics for one batch of at most 50 channel ids.
    pub(crate) async fn list_channels(&self, channel_ids: &[String]) -> Result<Vec<ChannelItem>> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        if channel_ids.len() > ID_BATCH_SIZE {
            return Err(anyhow!(
                "channel id batch exceeds provider limit of {ID_BATCH_SIZE}"
            ));
        }

        let url = format!("{}/channels", self.base_url);

        let body: Value = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,statistics"),
                ("id", &channel_ids.join(",")),
                ("key", self.api_key()?),
            ])
            .send()
            .await
            .context("channel list request failed")?
            .error_for_status()
            .context("channel list returned error status")?
            .json()
            .await
            .context("failed to decode channel list response")?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                Some(ChannelItem {
                    channel_id: item.get("id")?.as_str()?.to_string(),
                    title: text_at(item, "/snippet/title"),
                    description: text_at(item, "/snippet/description"),
                    subscriber_count: int_at(item, "/statistics/subscriberCount"),
                })
            })
            .collect())
    }
}

fn parse_video_item(item: &Value) -> Option<VideoItem> {
    let video_id = item.get("id")?.as_str()?.to_string();
    let published_at = item
        .pointer("/snippet/publishedAt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(VideoItem {
        video_id,
        title: text_at(item, "/snippet/title"),
        description: text_at(item, "/snippet/description"),
        channel_id: text_at(item, "/snippet/channelId"),
        channel_title: text_at(item, "/snippet/channelTitle"),
        published_at,
        view_count: int_at(item, "/statistics/viewCount"),
        like_count: int_at(item, "/statistics/likeCount"),
        comment_count: int_at(item, "/statistics/commentCount"),
        duration_seconds: item
            .pointer("/contentDetails/duration")
            .and_then(Value::as_str)
            .map(parse_iso8601_duration)
            .unwrap_or(0),
    })
}

fn text_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The provider returns counters as strings.
fn int_at(value: &Value, pointer: &str) -> i64 {
    value
        .pointer(pointer)
        .and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0)
}

/// ISO 8601 durations of the form PT#H#M#S.
#[must_use]
pub(crate) fn parse_iso8601_duration(duration: &str) -> i32 {
    let Some(captures) = DURATION_RE.captures(duration.trim()) else {
        return 0;
    };
    let part = |idx: usize| -> i32 {
        captures
            .get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    part(1) * 3600 + part(2) * 60 + part(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn duration_parses_full_form() {
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), 3723);
        assert_eq!(parse_iso8601_duration("PT4M20S"), 260);
        assert_eq!(parse_iso8601_duration("PT45S"), 45);
        assert_eq!(parse_iso8601_duration("PT2H"), 7200);
        assert_eq!(parse_iso8601_duration("garbage"), 0);
    }

    #[test]
    fn engagement_rate_is_percentage_of_views() {
        let item = VideoItem {
            video_id: "v".into(),
            title: String::new(),
            description: String::new(),
            channel_id: String::new(),
            channel_title: String::new(),
            published_at: None,
            view_count: 1000,
            like_count: 40,
            comment_count: 10,
            duration_seconds: 0,
        };
        assert!((item.engagement_rate() - 5.0).abs() < f64::EPSILON);

        let zero_views = VideoItem {
            view_count: 0,
            ..item
        };
        assert!((zero_views.engagement_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn list_videos_parses_string_counters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "abc123",
                    "snippet": {
                        "title": "Demo",
                        "channelId": "UC1",
                        "channelTitle": "Vendor",
                        "publishedAt": "2026-05-01T00:00:00Z"
                    },
                    "statistics": {"viewCount": "1500", "likeCount": "30", "commentCount": "5"},
                    "contentDetails": {"duration": "PT10M"}
                }]
            })))
            .mount(&server)
            .await;

        let client =
            VideoApiClient::new(&server.uri(), Some("key")).expect("client should build");

        let videos = client
            .list_videos(&["abc123".to_string()])
            .await
            .expect("video list should parse");

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].view_count, 1500);
        assert_eq!(videos[0].duration_seconds, 600);
    }

    #[tokio::test]
    async fn list_videos_rejects_oversized_batch() {
        let client = VideoApiClient::new("https://api.example.com", Some("key")).unwrap();
        let ids: Vec<String> = (0..51).map(|i| format!("v{i}")).collect();
        let error = client.list_videos(&ids).await.expect_err("should reject");
        assert!(error.to_string().contains("batch exceeds"));
    }
}
