/// Run configuration: an explicit struct serialized with the run for
/// auditability. Unrecognized keys are a validation error.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clients::search::ScheduleFrequency;
use crate::enrich::company::ClientContext;
use crate::pipeline::phases::PipelinePhase;
use crate::store::models::SerpKind;

fn default_client_id() -> String {
    "system".to_string()
}

fn default_regions() -> Vec<String> {
    vec!["US".to_string(), "UK".to_string()]
}

fn default_content_types() -> Vec<SerpKind> {
    vec![SerpKind::Organic, SerpKind::News, SerpKind::Video]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// None means all registered keywords.
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    #[serde(default = "default_content_types")]
    pub content_types: Vec<SerpKind>,

    /// Classification context.
    #[serde(default)]
    pub owned_domains: Vec<String>,
    #[serde(default)]
    pub competitor_domains: Vec<String>,

    /// Concurrency overrides; worker defaults apply when absent.
    #[serde(default)]
    pub max_concurrent_serp: Option<usize>,
    #[serde(default)]
    pub max_concurrent_enrichment: Option<usize>,
    #[serde(default)]
    pub max_concurrent_analysis: Option<usize>,

    /// Scheduling options.
    #[serde(default)]
    pub is_initial_run: bool,
    #[serde(default)]
    pub schedule_frequency: Option<ScheduleFrequency>,

    /// Feature flags. DSI runs whenever content analysis is enabled.
    #[serde(default = "default_true")]
    pub enable_keyword_metrics: bool,
    #[serde(default = "default_true")]
    pub enable_serp_collection: bool,
    #[serde(default = "default_true")]
    pub enable_company_enrichment: bool,
    #[serde(default = "default_true")]
    pub enable_video_enrichment: bool,
    #[serde(default = "default_true")]
    pub enable_content_scraping: bool,
    #[serde(default = "default_true")]
    pub enable_content_analysis: bool,
    #[serde(default)]
    pub force_refresh: bool,

    /// Testing overrides: force every phase on and bound the keyword set.
    #[serde(default)]
    pub testing_mode: bool,
    #[serde(default)]
    pub testing_batch_size: Option<usize>,

    /// Webhook-triggered runs: ingest an already-completed provider batch.
    #[serde(default)]
    pub serp_batch_id: Option<String>,
    #[serde(default)]
    pub serp_result_set_id: Option<i64>,
    #[serde(default)]
    pub serp_download_links: Option<Value>,

    /// Copy SERP rows from a prior run instead of collecting.
    #[serde(default)]
    pub reuse_serp_from_pipeline_id: Option<Uuid>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(serde_json::Map::new()))
            .expect("empty config deserializes")
    }
}

impl PipelineConfig {
    /// Phases enabled by this configuration, in DAG order.
    pub(crate) fn enabled_phases(&self) -> Vec<PipelinePhase> {
        let mut phases = Vec::new();
        if self.enable_keyword_metrics {
            phases.push(PipelinePhase::KeywordMetrics);
        }
        if self.enable_serp_collection {
            phases.push(PipelinePhase::SerpCollection);
        }
        if self.enable_company_enrichment {
            phases.push(PipelinePhase::CompanyEnrichmentSerp);
        }
        if self.enable_video_enrichment && self.content_types.contains(&SerpKind::Video) {
            phases.push(PipelinePhase::YoutubeEnrichment);
        }
        if self.enable_content_scraping {
            phases.push(PipelinePhase::ContentScraping);
        }
        if self.enable_content_analysis {
            phases.push(PipelinePhase::ContentAnalysis);
            phases.push(PipelinePhase::DsiCalculation);
        }
        phases
    }

    pub(crate) fn client_context(&self) -> ClientContext {
        ClientContext {
            client_name: self.client_id.clone(),
            owned_domains: self.owned_domains.clone(),
            competitor_domains: self.competitor_domains.clone(),
        }
    }

    pub(crate) fn schedule_frequency(&self) -> ScheduleFrequency {
        self.schedule_frequency.unwrap_or(ScheduleFrequency::Immediate)
    }

    /// Testing mode forces a full refresh run over every phase.
    pub(crate) fn apply_testing_mode(&mut self) {
        if !self.testing_mode {
            return;
        }
        self.enable_keyword_metrics = true;
        self.enable_serp_collection = true;
        self.enable_company_enrichment = true;
        self.enable_video_enrichment = true;
        self.enable_content_scraping = true;
        self.enable_content_analysis = true;
        self.force_refresh = true;

        if let (Some(limit), Some(keywords)) = (self.testing_batch_size, self.keywords.as_mut()) {
            keywords.truncate(limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_enable_the_full_dag() {
        let config = PipelineConfig::default();
        assert_eq!(config.client_id, "system");
        assert_eq!(config.regions, vec!["US", "UK"]);
        let phases = config.enabled_phases();
        assert_eq!(phases.len(), 7);
        assert_eq!(phases.last(), Some(&PipelinePhase::DsiCalculation));
    }

    #[test]
    fn unknown_keys_are_a_validation_error() {
        let result: Result<PipelineConfig, _> =
            serde_json::from_value(json!({"client_id": "c1", "surprise_field": true}));
        assert!(result.is_err());
    }

    #[test]
    fn disabling_analysis_drops_dsi_too() {
        let config: PipelineConfig =
            serde_json::from_value(json!({"enable_content_analysis": false})).unwrap();
        let phases = config.enabled_phases();
        assert!(!phases.contains(&PipelinePhase::ContentAnalysis));
        assert!(!phases.contains(&PipelinePhase::DsiCalculation));
    }

    #[test]
    fn video_phase_needs_video_content_type() {
        let config: PipelineConfig =
            serde_json::from_value(json!({"content_types": ["organic", "news"]})).unwrap();
        assert!(!config
            .enabled_phases()
            .contains(&PipelinePhase::YoutubeEnrichment));
    }

    #[test]
    fn testing_mode_forces_flags_and_truncates_keywords() {
        let mut config: PipelineConfig = serde_json::from_value(json!({
            "testing_mode": true,
            "testing_batch_size": 2,
            "keywords": ["a", "b", "c", "d"],
            "enable_video_enrichment": false
        }))
        .unwrap();

        config.apply_testing_mode();
        assert!(config.enable_video_enrichment);
        assert!(config.force_refresh);
        assert_eq!(config.keywords.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn config_round_trips_for_audit_storage() {
        let config = PipelineConfig::default();
        let value = serde_json::to_value(&config).unwrap();
        let back: PipelineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.client_id, config.client_id);
        assert_eq!(back.regions, config.regions);
    }
}
