/// Granular per-item progress tracking so phases are resumable.
use anyhow::Result;
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::dao::state::StateDao;
use crate::store::models::{PhaseProgress, SerpKind, StateItem, StateItemRow, StateStatus};

/// One unit of tracked work. The identifier is the deterministic canonical
/// string for the (phase, item) pair.
#[derive(Debug, Clone)]
pub(crate) enum WorkItem {
    SerpSearch {
        keyword: String,
        region: String,
        kind: SerpKind,
    },
    Domain(String),
    Url(String),
    Video {
        url: Option<String>,
        video_id: Option<String>,
    },
    KeywordRegion {
        keyword: String,
        region: String,
    },
}

impl WorkItem {
    pub(crate) fn item_type(&self) -> &'static str {
        match self {
            WorkItem::SerpSearch { .. } => "serp_search",
            WorkItem::Domain(_) => "domain",
            WorkItem::Url(_) => "url",
            WorkItem::Video { .. } => "video",
            WorkItem::KeywordRegion { .. } => "keyword_region",
        }
    }

    pub(crate) fn identifier(&self) -> String {
        match self {
            WorkItem::SerpSearch {
                keyword,
                region,
                kind,
            } => format!("{keyword}:{region}:{}", kind.as_str()),
            WorkItem::Domain(domain) => domain.clone(),
            WorkItem::Url(url) => url.clone(),
            WorkItem::Video { url, video_id } => url
                .clone()
                .or_else(|| video_id.clone())
                .unwrap_or_else(|| "video:unknown".to_string()),
            WorkItem::KeywordRegion { keyword, region } => format!("{keyword}:{region}:web"),
        }
    }

    fn progress_data(&self) -> Value {
        match self {
            WorkItem::SerpSearch {
                keyword,
                region,
                kind,
            } => json!({"keyword": keyword, "region": region, "type": kind.as_str()}),
            WorkItem::Domain(domain) => json!({"domain": domain}),
            WorkItem::Url(url) => json!({"url": url}),
            WorkItem::Video { url, video_id } => json!({"url": url, "video_id": video_id}),
            WorkItem::KeywordRegion { keyword, region } => {
                json!({"keyword": keyword, "region": region})
            }
        }
    }
}

pub(crate) struct StateTracker {
    dao: StateDao,
}

impl StateTracker {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            dao: StateDao::new(pool),
        }
    }

    /// Register items for a phase. Safe to call repeatedly: existing
    /// (run, phase, identifier) rows are left untouched.
    pub(crate) async fn initialize(
        &self,
        run_id: Uuid,
        phase: &str,
        items: &[WorkItem],
    ) -> Result<usize> {
        let records: Vec<StateItem> = items
            .iter()
            .map(|item| StateItem {
                item_type: item.item_type().to_string(),
                item_identifier: item.identifier(),
                progress_data: item.progress_data(),
            })
            .collect();

        let created = self.dao.initialize(run_id, phase, &records).await?;
        info!(
            %run_id,
            phase,
            items = items.len(),
            created,
            "initialized pipeline state tracking"
        );
        Ok(created)
    }

    pub(crate) async fn get_pending(
        &self,
        run_id: Uuid,
        phase: &str,
        limit: i64,
    ) -> Result<Vec<StateItemRow>> {
        let items = self.dao.get_pending(run_id, phase, limit).await?;
        debug!(%run_id, phase, count = items.len(), "retrieved pending items");
        Ok(items)
    }

    pub(crate) async fn mark_processing(&self, state_id: Uuid) -> Result<()> {
        self.dao
            .update(state_id, StateStatus::Processing, None, None, None)
            .await
    }

    pub(crate) async fn mark_completed(
        &self,
        state_id: Uuid,
        progress_data: Option<&Value>,
    ) -> Result<()> {
        self.dao
            .update(state_id, StateStatus::Completed, progress_data, None, None)
            .await
    }

    pub(crate) async fn mark_failed(
        &self,
        state_id: Uuid,
        error: &str,
        error_category: Option<&str>,
    ) -> Result<()> {
        self.dao
            .update(
                state_id,
                StateStatus::Failed,
                None,
                Some(error),
                error_category,
            )
            .await
    }

    pub(crate) async fn phase_progress(&self, run_id: Uuid, phase: &str) -> Result<PhaseProgress> {
        self.dao.phase_progress(run_id, phase).await
    }

    pub(crate) async fn checkpoint(
        &self,
        run_id: Uuid,
        phase: &str,
        name: &str,
        state_data: &Value,
    ) -> Result<()> {
        self.dao.save_checkpoint(run_id, phase, name, state_data).await?;
        info!(%run_id, phase, checkpoint = name, "created checkpoint");
        Ok(())
    }

    pub(crate) async fn get_checkpoint(
        &self,
        run_id: Uuid,
        phase: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        self.dao.get_checkpoint(run_id, phase, name).await
    }

    /// Bulk failed→pending with counters cleared.
    pub(crate) async fn reset_failed(
        &self,
        run_id: Uuid,
        phase: Option<&str>,
        max_items: Option<i64>,
    ) -> Result<u64> {
        let count = self.dao.reset_failed(run_id, phase, max_items).await?;
        info!(%run_id, ?phase, count, "reset failed items to pending");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serp_identifier_is_keyword_region_type() {
        let item = WorkItem::SerpSearch {
            keyword: "cloud storage".to_string(),
            region: "US".to_string(),
            kind: SerpKind::Organic,
        };
        assert_eq!(item.identifier(), "cloud storage:US:organic");
        assert_eq!(item.item_type(), "serp_search");
    }

    #[test]
    fn domain_and_url_identifiers_pass_through() {
        assert_eq!(WorkItem::Domain("a.com".into()).identifier(), "a.com");
        assert_eq!(
            WorkItem::Url("https://a.com/x".into()).identifier(),
            "https://a.com/x"
        );
    }

    #[test]
    fn video_identifier_prefers_url_then_id() {
        let with_url = WorkItem::Video {
            url: Some("https://youtube.com/watch?v=abc".into()),
            video_id: Some("abc".into()),
        };
        assert_eq!(with_url.identifier(), "https://youtube.com/watch?v=abc");

        let id_only = WorkItem::Video {
            url: None,
            video_id: Some("abc".into()),
        };
        assert_eq!(id_only.identifier(), "abc");
    }

    #[test]
    fn keyword_region_falls_back_to_web_type() {
        let item = WorkItem::KeywordRegion {
            keyword: "crm".into(),
            region: "UK".into(),
        };
        assert_eq!(item.identifier(), "crm:UK:web");
    }
}
