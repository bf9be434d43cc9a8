use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PipelineStatus::Pending),
            "running" => Some(PipelineStatus::Running),
            "completed" => Some(PipelineStatus::Completed),
            "failed" => Some(PipelineStatus::Failed),
            "cancelled" => Some(PipelineStatus::Cancelled),
            _ => None,
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }
}

/// How the run was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Batch,
    Scheduled,
    Manual,
    Testing,
}

impl PipelineMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PipelineMode::Batch => "batch",
            PipelineMode::Scheduled => "scheduled",
            PipelineMode::Manual => "manual",
            PipelineMode::Testing => "testing",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "batch" => Some(PipelineMode::Batch),
            "scheduled" => Some(PipelineMode::Scheduled),
            "manual" => Some(PipelineMode::Manual),
            "testing" => Some(PipelineMode::Testing),
            _ => None,
        }
    }
}

/// Status of one phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Blocked,
    Queued,
}

impl PhaseState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PhaseState::Pending => "pending",
            PhaseState::Running => "running",
            PhaseState::Completed => "completed",
            PhaseState::Failed => "failed",
            PhaseState::Skipped => "skipped",
            PhaseState::Blocked => "blocked",
            PhaseState::Queued => "queued",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseState::Pending),
            "running" => Some(PhaseState::Running),
            "completed" => Some(PhaseState::Completed),
            "failed" => Some(PhaseState::Failed),
            "skipped" => Some(PhaseState::Skipped),
            "blocked" => Some(PhaseState::Blocked),
            "queued" => Some(PhaseState::Queued),
            _ => None,
        }
    }

    /// Terminal statuses survive re-initialization on resume.
    #[allow(dead_code)]
    pub(crate) fn is_preserved_on_resume(self) -> bool {
        matches!(
            self,
            PhaseState::Completed | PhaseState::Failed | PhaseState::Blocked | PhaseState::Running
        )
    }
}

/// Status of one tracked work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
    Queued,
}

impl StateStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StateStatus::Pending => "pending",
            StateStatus::Processing => "processing",
            StateStatus::Completed => "completed",
            StateStatus::Failed => "failed",
            StateStatus::Skipped => "skipped",
            StateStatus::Queued => "queued",
        }
    }
}

/// Aggregated counters carried on a run row. Monotonically non-decreasing
/// while the run is live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub keywords_processed: i64,
    pub serp_results_collected: i64,
    pub companies_enriched: i64,
    pub videos_enriched: i64,
    pub content_analyzed: i64,
    pub landscapes_calculated: i64,
}

/// One pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub client_id: String,
    pub mode: PipelineMode,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: Value,
    pub counters: RunCounters,
    pub phase_results: Value,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// One (run, phase) status row.
#[derive(Debug, Clone)]
pub(crate) struct PhaseStatusRow {
    pub(crate) phase_name: String,
    pub(crate) status: PhaseState,
    pub(crate) result_data: Option<Value>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

/// One tracked item row.
#[derive(Debug, Clone)]
pub(crate) struct StateItemRow {
    pub(crate) id: Uuid,
    #[allow(dead_code)]
    pub(crate) item_type: String,
    pub(crate) item_identifier: String,
    #[allow(dead_code)]
    pub(crate) attempt_count: i32,
    #[allow(dead_code)]
    pub(crate) progress_data: Value,
}

/// Work item handed to `StateTracker::initialize`.
#[derive(Debug, Clone)]
pub(crate) struct StateItem {
    pub(crate) item_type: String,
    pub(crate) item_identifier: String,
    pub(crate) progress_data: Value,
}

/// Per-phase progress aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct PhaseProgress {
    pub(crate) total: i64,
    pub(crate) pending: i64,
    pub(crate) processing: i64,
    pub(crate) completed: i64,
    pub(crate) failed: i64,
    pub(crate) skipped: i64,
    pub(crate) completion_percentage: f64,
}

/// SERP content types; the closed set of result variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerpKind {
    Organic,
    News,
    Video,
}

impl SerpKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SerpKind::Organic => "organic",
            SerpKind::News => "news",
            SerpKind::Video => "video",
        }
    }

    #[allow(dead_code)]
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "organic" => Some(SerpKind::Organic),
            "news" => Some(SerpKind::News),
            "video" => Some(SerpKind::Video),
            _ => None,
        }
    }
}

/// One ranked search result ready for storage. Kind-specific provider fields
/// are optional; unknown provider fields never reach this struct.
#[derive(Debug, Clone)]
pub(crate) struct SerpRecord {
    pub(crate) keyword_id: Uuid,
    pub(crate) search_date: NaiveDate,
    pub(crate) location: String,
    pub(crate) kind: SerpKind,
    pub(crate) position: i32,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) snippet: String,
    pub(crate) domain: String,
    pub(crate) source: Option<String>,
    pub(crate) published_date: Option<NaiveDate>,
    pub(crate) video_length: Option<String>,
    pub(crate) total_results: Option<i64>,
    pub(crate) device: Option<String>,
}

/// One scraped page. `url` is the upsert key.
#[derive(Debug, Clone)]
pub(crate) struct ScrapedPage {
    pub(crate) url: String,
    pub(crate) domain: String,
    pub(crate) title: Option<String>,
    pub(crate) content: Option<String>,
    pub(crate) html: Option<String>,
    pub(crate) word_count: i32,
    pub(crate) status: ScrapeStatus,
    pub(crate) error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ScrapeStatus {
    Completed,
    Failed,
}

impl ScrapeStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }
}

/// Closed provenance classification for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "OWNED")]
    Owned,
    #[serde(rename = "COMPETITOR")]
    Competitor,
    #[serde(rename = "PREMIUM_PUBLISHER")]
    PremiumPublisher,
    #[serde(rename = "TECHNOLOGY")]
    Technology,
    #[serde(rename = "FINANCE")]
    Finance,
    #[serde(rename = "PROFESSIONAL_BODY")]
    ProfessionalBody,
    #[serde(rename = "SOCIAL_MEDIA")]
    SocialMedia,
    #[serde(rename = "EDUCATION")]
    Education,
    #[serde(rename = "NON_PROFIT")]
    NonProfit,
    #[serde(rename = "GOVERNMENT")]
    Government,
    #[serde(rename = "OTHER")]
    Other,
}

impl SourceType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SourceType::Owned => "OWNED",
            SourceType::Competitor => "COMPETITOR",
            SourceType::PremiumPublisher => "PREMIUM_PUBLISHER",
            SourceType::Technology => "TECHNOLOGY",
            SourceType::Finance => "FINANCE",
            SourceType::ProfessionalBody => "PROFESSIONAL_BODY",
            SourceType::SocialMedia => "SOCIAL_MEDIA",
            SourceType::Education => "EDUCATION",
            SourceType::NonProfit => "NON_PROFIT",
            SourceType::Government => "GOVERNMENT",
            SourceType::Other => "OTHER",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNED" => Some(SourceType::Owned),
            "COMPETITOR" => Some(SourceType::Competitor),
            "PREMIUM_PUBLISHER" => Some(SourceType::PremiumPublisher),
            "TECHNOLOGY" => Some(SourceType::Technology),
            "FINANCE" => Some(SourceType::Finance),
            "PROFESSIONAL_BODY" => Some(SourceType::ProfessionalBody),
            "SOCIAL_MEDIA" => Some(SourceType::SocialMedia),
            "EDUCATION" => Some(SourceType::Education),
            "NON_PROFIT" => Some(SourceType::NonProfit),
            "GOVERNMENT" => Some(SourceType::Government),
            "OTHER" => Some(SourceType::Other),
            _ => None,
        }
    }
}

/// Enriched company profile keyed by domain.
#[derive(Debug, Clone)]
pub(crate) struct CompanyProfile {
    pub(crate) domain: String,
    pub(crate) company_name: String,
    pub(crate) industry: Option<String>,
    pub(crate) employee_range: Option<String>,
    pub(crate) revenue_range: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) source: String,
    pub(crate) source_type: SourceType,
    pub(crate) confidence_score: f64,
    pub(crate) technologies: Vec<String>,
    pub(crate) social_profiles: Value,
    pub(crate) headquarters_location: Option<String>,
}

/// Daily statistics snapshot for one video.
#[derive(Debug, Clone)]
pub(crate) struct VideoSnapshot {
    pub(crate) snapshot_date: NaiveDate,
    pub(crate) video_id: String,
    pub(crate) video_url: String,
    pub(crate) video_title: String,
    pub(crate) channel_id: String,
    pub(crate) channel_title: String,
    pub(crate) published_at: Option<DateTime<Utc>>,
    pub(crate) view_count: i64,
    pub(crate) like_count: i64,
    pub(crate) comment_count: i64,
    pub(crate) subscriber_count: i64,
    pub(crate) engagement_rate: f64,
    pub(crate) duration_seconds: i32,
}

/// Channel resolved to a company, cached across runs.
#[derive(Debug, Clone)]
pub(crate) struct ChannelCompany {
    pub(crate) channel_id: String,
    pub(crate) company_name: Option<String>,
    pub(crate) company_domain: Option<String>,
    pub(crate) channel_type: Option<String>,
    pub(crate) confidence: f64,
    pub(crate) reasoning: Option<String>,
}

/// Keyword with optional search-volume metrics.
#[derive(Debug, Clone)]
pub(crate) struct Keyword {
    pub(crate) id: Uuid,
    pub(crate) keyword: String,
    #[allow(dead_code)]
    pub(crate) avg_monthly_searches: Option<i64>,
}

/// Stored dimension scores for one analyzed URL.
#[derive(Debug, Clone)]
pub(crate) struct ContentAnalysisRecord {
    pub(crate) url: String,
    pub(crate) project_id: Option<Uuid>,
    pub(crate) summary: Option<String>,
    pub(crate) overall_sentiment: String,
    pub(crate) mentions: Value,
    pub(crate) confidence: f64,
    pub(crate) dimensions: Vec<DimensionScore>,
}

/// One scored dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DimensionScore {
    pub(crate) dimension_type: String,
    pub(crate) dimension_id: String,
    pub(crate) score: f64,
    pub(crate) evidence_threshold_met: bool,
    pub(crate) relevant_words: i64,
    pub(crate) scoring_breakdown: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            PipelineStatus::Pending,
            PipelineStatus::Running,
            PipelineStatus::Completed,
            PipelineStatus::Failed,
            PipelineStatus::Cancelled,
        ] {
            assert_eq!(PipelineStatus::parse(status.as_str()), Some(status));
        }
        assert!(PipelineStatus::parse("bogus").is_none());
    }

    #[test]
    fn terminal_statuses_set_completed_at() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Failed.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
    }

    #[test]
    fn resume_preserves_terminal_phase_states() {
        assert!(PhaseState::Completed.is_preserved_on_resume());
        assert!(PhaseState::Failed.is_preserved_on_resume());
        assert!(PhaseState::Blocked.is_preserved_on_resume());
        assert!(PhaseState::Running.is_preserved_on_resume());
        assert!(!PhaseState::Pending.is_preserved_on_resume());
        assert!(!PhaseState::Skipped.is_preserved_on_resume());
    }

    #[test]
    fn source_type_round_trips() {
        for st in [
            SourceType::Owned,
            SourceType::Competitor,
            SourceType::PremiumPublisher,
            SourceType::Technology,
            SourceType::Finance,
            SourceType::ProfessionalBody,
            SourceType::SocialMedia,
            SourceType::Education,
            SourceType::NonProfit,
            SourceType::Government,
            SourceType::Other,
        ] {
            assert_eq!(SourceType::parse(st.as_str()), Some(st));
        }
    }
}
