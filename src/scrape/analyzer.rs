/// AI content analysis against configurable dimensions.
///
/// The analyzer's contract per URL: dimension scores on a 0-10 scale with an
/// enforced evidence floor (thin content is capped no matter what the model
/// says) and contextual rules applied as explicit additive entries in a
/// scoring breakdown.
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients::ai::AiClient;
use crate::store::dao::content::ContentDao;
use crate::store::models::{ContentAnalysisRecord, DimensionScore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EvidenceConfig {
    /// Minimum relevant words for a score to stand on its own.
    pub(crate) min_words: i64,
    /// Ceiling applied when the floor is not met.
    pub(crate) below_floor_cap: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            min_words: 120,
            below_floor_cap: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RuleAdjustment {
    Cap,
    Penalty,
    Bonus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContextualRule {
    pub(crate) name: String,
    pub(crate) description: String,
    /// Condition key the model reports back when triggered.
    pub(crate) condition: String,
    pub(crate) adjustment_type: RuleAdjustment,
    pub(crate) adjustment_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DimensionConfig {
    pub(crate) dimension_id: String,
    pub(crate) dimension_type: String,
    pub(crate) name: String,
    pub(crate) ai_context: String,
    #[serde(default)]
    pub(crate) evidence: EvidenceConfig,
    #[serde(default)]
    pub(crate) contextual_rules: Vec<ContextualRule>,
}

/// Built-in dimensions used when a client has not configured custom ones.
#[must_use]
pub(crate) fn default_dimensions() -> Vec<DimensionConfig> {
    vec![
        DimensionConfig {
            dimension_id: "persona".to_string(),
            dimension_type: "persona".to_string(),
            name: "Persona fit".to_string(),
            ai_context: "How well this content addresses the buyer persona's \
                         responsibilities, pains, and vocabulary."
                .to_string(),
            evidence: EvidenceConfig::default(),
            contextual_rules: vec![ContextualRule {
                name: "off_topic_cap".to_string(),
                description: "Content that is off-topic for the solution space is capped"
                    .to_string(),
                condition: "off_topic".to_string(),
                adjustment_type: RuleAdjustment::Cap,
                adjustment_value: 3.0,
            }],
        },
        DimensionConfig {
            dimension_id: "jtbd_phase".to_string(),
            dimension_type: "jtbd_phase".to_string(),
            name: "Jobs-to-be-done phase alignment".to_string(),
            ai_context: "How clearly the content maps to a phase of the buyer's job: \
                         problem identification, solution exploration, requirements, \
                         supplier selection, or validation."
                .to_string(),
            evidence: EvidenceConfig::default(),
            contextual_rules: vec![ContextualRule {
                name: "generic_language_penalty".to_string(),
                description: "Generic marketing language without phase markers loses a point"
                    .to_string(),
                condition: "generic_language".to_string(),
                adjustment_type: RuleAdjustment::Penalty,
                adjustment_value: 1.0,
            }],
        },
    ]
}

/// Raw model output for one dimension before local enforcement.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawDimensionResult {
    pub(crate) dimension_id: String,
    pub(crate) score: f64,
    #[serde(default)]
    pub(crate) relevant_words: i64,
    #[serde(default)]
    pub(crate) triggered_conditions: Vec<String>,
    #[serde(default)]
    pub(crate) evidence_summary: Option<String>,
}

/// Enforce the evidence floor and contextual rules over a raw model score.
/// Every adjustment is recorded in the breakdown with a human-readable
/// rationale.
#[must_use]
pub(crate) fn apply_scoring_rules(
    config: &DimensionConfig,
    raw: &RawDimensionResult,
) -> DimensionScore {
    let mut score = raw.score.clamp(0.0, 10.0);
    let mut breakdown = vec![json!({
        "step": "base_score",
        "value": score,
        "rationale": "raw model score, clamped to the 0-10 scale",
    })];

    for rule in &config.contextual_rules {
        if !raw.triggered_conditions.contains(&rule.condition) {
            continue;
        }
        let before = score;
        score = match rule.adjustment_type {
            RuleAdjustment::Cap => score.min(rule.adjustment_value),
            RuleAdjustment::Penalty => score - rule.adjustment_value,
            RuleAdjustment::Bonus => score + rule.adjustment_value,
        };
        breakdown.push(json!({
            "step": "contextual_rule",
            "rule": rule.name,
            "adjustment": format!("{:?}", rule.adjustment_type).to_lowercase(),
            "value": rule.adjustment_value,
            "before": before,
            "after": score,
            "rationale": rule.description,
        }));
    }

    let threshold_met = raw.relevant_words >= config.evidence.min_words;
    if !threshold_met && score > config.evidence.below_floor_cap {
        let before = score;
        score = config.evidence.below_floor_cap;
        breakdown.push(json!({
            "step": "evidence_floor",
            "before": before,
            "after": score,
            "rationale": format!(
                "{} relevant words is below the {}-word evidence floor; score capped at {}",
                raw.relevant_words, config.evidence.min_words, config.evidence.below_floor_cap
            ),
        }));
    }

    score = score.clamp(0.0, 10.0);

    DimensionScore {
        dimension_type: config.dimension_type.clone(),
        dimension_id: config.dimension_id.clone(),
        score,
        evidence_threshold_met: threshold_met,
        relevant_words: raw.relevant_words,
        scoring_breakdown: json!({
            "steps": breakdown,
            "evidence_summary": raw.evidence_summary,
        }),
    }
}

pub(crate) struct ContentAnalyzer {
    ai: Arc<AiClient>,
    dao: ContentDao,
    dimensions: Vec<DimensionConfig>,
}

impl ContentAnalyzer {
    pub(crate) fn new(ai: Arc<AiClient>, dao: ContentDao, dimensions: Vec<DimensionConfig>) -> Self {
        let dimensions = if dimensions.is_empty() {
            default_dimensions()
        } else {
            dimensions
        };
        Self { ai, dao, dimensions }
    }

    /// Analyze one URL and persist the result. Returns the stored analysis
    /// id.
    pub(crate) async fn analyze(
        &self,
        url: &str,
        content: &str,
        project_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let record = if self.ai.is_configured() {
            match self.ai_analyze(url, content, project_id).await {
                Ok(record) => record,
                Err(err) => {
                    warn!(url, error = %err, "AI analysis failed, storing neutral result");
                    self.neutral_record(url, project_id)
                }
            }
        } else {
            self.neutral_record(url, project_id)
        };

        let analysis_id = self.dao.insert_analysis(&record).await?;
        debug!(url, %analysis_id, "content analysis stored");
        Ok(analysis_id)
    }

    async fn ai_analyze(
        &self,
        url: &str,
        content: &str,
        project_id: Option<Uuid>,
    ) -> Result<ContentAnalysisRecord> {
        let dimensions_prompt = self
            .dimensions
            .iter()
            .map(|d| {
                let conditions: Vec<&str> = d
                    .contextual_rules
                    .iter()
                    .map(|r| r.condition.as_str())
                    .collect();
                format!(
                    "- {} (id: {}): {}. Report relevant_words (count of words bearing on \
                     this dimension) and any triggered conditions from {:?}.",
                    d.name, d.dimension_id, d.ai_context, conditions
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let schema = json!({
            "type": "object",
            "required": ["dimensions", "overall_sentiment"],
            "properties": {
                "summary": {"type": "string"},
                "overall_sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]},
                "mentions": {"type": "array"},
                "confidence": {"type": "number"},
                "dimensions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["dimension_id", "score"],
                        "properties": {
                            "dimension_id": {"type": "string"},
                            "score": {"type": "number"},
                            "relevant_words": {"type": "integer"},
                            "triggered_conditions": {"type": "array", "items": {"type": "string"}},
                            "evidence_summary": {"type": "string"}
                        }
                    }
                }
            }
        });

        // Keep the prompt bounded; long pages carry no extra signal.
        let excerpt: String = content.chars().take(12_000).collect();
        let user = format!(
            "Analyze this page for a competitive digital-landscape study.\n\nURL: {url}\n\n\
             Score each dimension 0-10:\n{dimensions_prompt}\n\nScoring guidance: 9-10 \
             extensive specific evidence; 7-8 good evidence with clear markers; 5-6 moderate \
             evidence with some ambiguity; 3-4 limited, mostly inferential evidence; 0-2 \
             very little evidence.\n\nAlso return a 2-3 sentence summary, overall_sentiment, \
             an array of company/brand mentions, and your confidence (0-1).\n\n\
             CONTENT:\n{excerpt}"
        );

        let value = self
            .ai
            .structured_json(
                "You analyze web content against scoring dimensions for competitive \
                 intelligence. Be evidence-driven and return only valid JSON.",
                &user,
                &schema,
                Some(1500),
            )
            .await?;

        let raw_dimensions: Vec<RawDimensionResult> = value
            .get("dimensions")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let mut scores = Vec::with_capacity(self.dimensions.len());
        for config in &self.dimensions {
            let raw = raw_dimensions
                .iter()
                .find(|raw| raw.dimension_id == config.dimension_id)
                .cloned()
                .unwrap_or(RawDimensionResult {
                    dimension_id: config.dimension_id.clone(),
                    score: 5.0,
                    relevant_words: 0,
                    triggered_conditions: Vec::new(),
                    evidence_summary: None,
                });
            scores.push(apply_scoring_rules(config, &raw));
        }

        Ok(ContentAnalysisRecord {
            url: url.to_string(),
            project_id,
            summary: value
                .get("summary")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            overall_sentiment: value
                .get("overall_sentiment")
                .and_then(Value::as_str)
                .unwrap_or("neutral")
                .to_string(),
            mentions: value.get("mentions").cloned().unwrap_or_else(|| json!([])),
            confidence: value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            dimensions: scores,
        })
    }

    /// Neutral default when no AI provider is configured or a call failed
    /// terminally: every dimension sits at the midpoint.
    fn neutral_record(&self, url: &str, project_id: Option<Uuid>) -> ContentAnalysisRecord {
        ContentAnalysisRecord {
            url: url.to_string(),
            project_id,
            summary: None,
            overall_sentiment: "neutral".to_string(),
            mentions: json!([]),
            confidence: 0.0,
            dimensions: self
                .dimensions
                .iter()
                .map(|config| DimensionScore {
                    dimension_type: config.dimension_type.clone(),
                    dimension_id: config.dimension_id.clone(),
                    score: 5.0,
                    evidence_threshold_met: false,
                    relevant_words: 0,
                    scoring_breakdown: json!({
                        "steps": [{"step": "default", "value": 5.0,
                                   "rationale": "no analysis available"}],
                    }),
                })
                .collect(),
        }
    }
}

impl Default for RawDimensionResult {
    fn default() -> Self {
        Self {
            dimension_id: String::new(),
            score: 5.0,
            relevant_words: 0,
            triggered_conditions: Vec::new(),
            evidence_summary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona_config() -> DimensionConfig {
        default_dimensions().remove(0)
    }

    #[test]
    fn evidence_floor_caps_thin_content() {
        let config = persona_config();
        let raw = RawDimensionResult {
            dimension_id: "persona".to_string(),
            score: 9.0,
            relevant_words: 50,
            triggered_conditions: Vec::new(),
            evidence_summary: None,
        };

        let scored = apply_scoring_rules(&config, &raw);
        assert!(scored.score <= 4.0);
        assert!(!scored.evidence_threshold_met);

        let steps = scored.scoring_breakdown["steps"].as_array().unwrap();
        assert!(steps.iter().any(|s| s["step"] == "evidence_floor"));
    }

    #[test]
    fn sufficient_evidence_keeps_raw_score() {
        let config = persona_config();
        let raw = RawDimensionResult {
            dimension_id: "persona".to_string(),
            score: 8.0,
            relevant_words: 300,
            triggered_conditions: Vec::new(),
            evidence_summary: Some("strong persona markers".to_string()),
        };

        let scored = apply_scoring_rules(&config, &raw);
        assert!((scored.score - 8.0).abs() < f64::EPSILON);
        assert!(scored.evidence_threshold_met);
    }

    #[test]
    fn contextual_cap_applies_when_condition_triggers() {
        let config = persona_config();
        let raw = RawDimensionResult {
            dimension_id: "persona".to_string(),
            score: 8.0,
            relevant_words: 300,
            triggered_conditions: vec!["off_topic".to_string()],
            evidence_summary: None,
        };

        let scored = apply_scoring_rules(&config, &raw);
        assert!((scored.score - 3.0).abs() < f64::EPSILON);

        let steps = scored.scoring_breakdown["steps"].as_array().unwrap();
        let rule_step = steps
            .iter()
            .find(|s| s["step"] == "contextual_rule")
            .expect("rule step recorded");
        assert_eq!(rule_step["rule"], "off_topic_cap");
    }

    #[test]
    fn penalty_subtracts_and_clamps_at_zero() {
        let config = DimensionConfig {
            dimension_id: "custom".to_string(),
            dimension_type: "custom".to_string(),
            name: "Custom".to_string(),
            ai_context: String::new(),
            evidence: EvidenceConfig {
                min_words: 0,
                below_floor_cap: 4.0,
            },
            contextual_rules: vec![ContextualRule {
                name: "big_penalty".to_string(),
                description: "heavy penalty".to_string(),
                condition: "bad".to_string(),
                adjustment_type: RuleAdjustment::Penalty,
                adjustment_value: 7.0,
            }],
        };

        let raw = RawDimensionResult {
            dimension_id: "custom".to_string(),
            score: 3.0,
            relevant_words: 10,
            triggered_conditions: vec!["bad".to_string()],
            evidence_summary: None,
        };

        let scored = apply_scoring_rules(&config, &raw);
        assert!((scored.score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_scores_outside_scale_are_clamped() {
        let config = persona_config();
        let raw = RawDimensionResult {
            dimension_id: "persona".to_string(),
            score: 14.0,
            relevant_words: 300,
            triggered_conditions: Vec::new(),
            evidence_summary: None,
        };
        let scored = apply_scoring_rules(&config, &raw);
        assert!((scored.score - 10.0).abs() < f64::EPSILON);
    }
}
