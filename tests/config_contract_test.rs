//! Serialization contracts for the run-control API payloads. The pipeline
//! config is stored with the run for auditability, so its wire shape is
//! load-bearing.
use serde_json::json;

use dsi_worker::clients::search::ScheduleFrequency;
use dsi_worker::pipeline::config::PipelineConfig;
use dsi_worker::store::models::{PipelineStatus, SerpKind};

#[test]
fn minimal_body_fills_documented_defaults() {
    let config: PipelineConfig = serde_json::from_value(json!({})).expect("empty body is valid");

    assert_eq!(config.client_id, "system");
    assert_eq!(config.regions, vec!["US", "UK"]);
    assert_eq!(
        config.content_types,
        vec![SerpKind::Organic, SerpKind::News, SerpKind::Video]
    );
    assert!(config.enable_serp_collection);
    assert!(config.enable_content_analysis);
    assert!(!config.is_initial_run);
    assert!(config.keywords.is_none());
}

#[test]
fn unknown_keys_are_rejected() {
    let result: Result<PipelineConfig, _> =
        serde_json::from_value(json!({"max_concurrent_scrape": 10}));
    assert!(result.is_err(), "unrecognized keys must be a validation error");
}

#[test]
fn full_body_round_trips() {
    let body = json!({
        "client_id": "acme",
        "keywords": ["cloud storage", "object storage"],
        "regions": ["US"],
        "content_types": ["organic", "news"],
        "owned_domains": ["acme.com"],
        "competitor_domains": ["rival.io"],
        "is_initial_run": true,
        "schedule_frequency": "weekly",
        "enable_video_enrichment": false,
        "testing_mode": true,
        "testing_batch_size": 5,
        "reuse_serp_from_pipeline_id": "8f14e45f-ceea-467f-a8ea-55e6f8e8f8a1"
    });

    let config: PipelineConfig = serde_json::from_value(body).expect("valid body");
    assert_eq!(config.schedule_frequency, Some(ScheduleFrequency::Weekly));
    assert_eq!(config.owned_domains, vec!["acme.com"]);
    assert!(config.reuse_serp_from_pipeline_id.is_some());

    let serialized = serde_json::to_value(&config).expect("serializes");
    let back: PipelineConfig = serde_json::from_value(serialized).expect("round trips");
    assert_eq!(back.client_id, "acme");
    assert_eq!(back.keywords.as_deref(), Some(&["cloud storage".to_string(),
        "object storage".to_string()][..]));
}

#[test]
fn statuses_serialize_lowercase() {
    assert_eq!(
        serde_json::to_value(PipelineStatus::Running).unwrap(),
        json!("running")
    );
    assert_eq!(
        serde_json::to_value(SerpKind::Video).unwrap(),
        json!("video")
    );
    assert_eq!(
        serde_json::from_value::<PipelineStatus>(json!("cancelled")).unwrap(),
        PipelineStatus::Cancelled
    );
}
