/// Channel-to-company resolution.
///
/// For each distinct channel seen by a run, infer the operating company from
/// channel metadata via the AI provider with a rule-based fallback. Mappings
/// are cached across runs; confidence at or above the configured threshold
/// is considered authoritative and never recomputed.
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::ai::AiClient;
use crate::store::dao::video::VideoDao;
use crate::store::models::ChannelCompany;

static DOMAIN_LIKE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9-]+\.(com|net|org|io|co)$").expect("valid domain-title regex")
});

#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelResolutionOutcome {
    pub(crate) channels_total: usize,
    pub(crate) resolved: usize,
    pub(crate) unresolved: usize,
}

pub(crate) struct ChannelCompanyResolver {
    pool: PgPool,
    dao: VideoDao,
    ai: Arc<AiClient>,
    confidence_threshold: f64,
}

impl ChannelCompanyResolver {
    pub(crate) fn new(pool: PgPool, ai: Arc<AiClient>, confidence_threshold: f64) -> Self {
        let dao = VideoDao::new(pool.clone());
        Self {
            pool,
            dao,
            ai,
            confidence_threshold,
        }
    }

    /// Resolve every channel the run references that has no authoritative
    /// mapping yet.
    pub(crate) async fn resolve_for_run(&self, run_id: Uuid) -> Result<ChannelResolutionOutcome> {
        let channels = self.dao.channels_for_run(run_id).await?;
        let mut outcome = ChannelResolutionOutcome {
            channels_total: channels.len(),
            ..ChannelResolutionOutcome::default()
        };

        for channel_id in channels {
            if let Some(existing) = self.dao.get_channel_company(&channel_id).await? {
                if existing.confidence >= self.confidence_threshold
                    && existing.company_domain.as_deref().is_some_and(|d| !d.is_empty())
                {
                    outcome.resolved += 1;
                    continue;
                }
            }

            let context = self.channel_context(&channel_id).await?;
            let mapping = self.resolve_channel(&channel_id, &context).await;

            let resolved = mapping
                .company_domain
                .as_deref()
                .is_some_and(|d| !d.is_empty());
            self.dao.upsert_channel_company(&mapping).await?;

            if resolved {
                outcome.resolved += 1;
            } else {
                outcome.unresolved += 1;
            }
        }

        info!(
            total = outcome.channels_total,
            resolved = outcome.resolved,
            unresolved = outcome.unresolved,
            "channel company resolution finished"
        );
        Ok(outcome)
    }

    async fn resolve_channel(&self, channel_id: &str, context: &ChannelContext) -> ChannelCompany {
        if self.ai.is_configured() {
            match self.ai_resolve(channel_id, context).await {
                Ok(Some(mapping)) => return mapping,
                Ok(None) => {}
                Err(err) => {
                    warn!(channel_id, error = %err, "AI channel resolution failed");
                }
            }
        }
        rule_based_mapping(channel_id, context)
    }

    async fn ai_resolve(
        &self,
        channel_id: &str,
        context: &ChannelContext,
    ) -> Result<Option<ChannelCompany>> {
        let schema = json!({
            "type": "object",
            "required": ["confidence"],
            "properties": {
                "company_name": {"type": ["string", "null"]},
                "company_domain": {"type": ["string", "null"]},
                "channel_type": {"type": ["string", "null"]},
                "confidence": {"type": "number"},
                "reasoning": {"type": "string"}
            }
        });

        let user = format!(
            "Identify the company behind this video channel.\n\n\
             Channel title: {}\nChannel description: {}\nSample video title: {}\n\n\
             Return JSON with company_name, company_domain (registrable domain or null \
             when the channel is an individual creator), channel_type \
             (brand|creator|media|unknown), confidence (0-1), reasoning.",
            context.channel_title,
            context.channel_description.chars().take(400).collect::<String>(),
            context.sample_video_title,
        );

        let value = self
            .ai
            .structured_json(
                "You map video channels to the companies that operate them. \
                 Return only valid JSON.",
                &user,
                &schema,
                Some(300),
            )
            .await?;

        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let text = |key: &str| -> Option<String> {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };

        Ok(Some(ChannelCompany {
            channel_id: channel_id.to_string(),
            company_name: text("company_name"),
            company_domain: text("company_domain").map(|d| d.to_lowercase()),
            channel_type: text("channel_type"),
            confidence,
            reasoning: text("reasoning"),
        }))
    }

    async fn channel_context(&self, channel_id: &str) -> Result<ChannelContext> {
        let row = sqlx::query(
            r"
            SELECT channel_title, MAX(video_title) AS sample_video_title
            FROM video_snapshots
            WHERE channel_id = $1
            GROUP BY channel_title
            ORDER BY channel_title
            LIMIT 1
            ",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ChannelContext {
                channel_title: row.try_get("channel_title").unwrap_or_default(),
                channel_description: String::new(),
                sample_video_title: row.try_get("sample_video_title").unwrap_or_default(),
            },
            None => ChannelContext::default(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelContext {
    pub(crate) channel_title: String,
    pub(crate) channel_description: String,
    pub(crate) sample_video_title: String,
}

/// Deterministic fallback: a channel titled like a bare domain maps to that
/// domain; anything else keeps the title as a low-confidence company name.
#[must_use]
pub(crate) fn rule_based_mapping(channel_id: &str, context: &ChannelContext) -> ChannelCompany {
    let title = context.channel_title.trim();

    if DOMAIN_LIKE_TITLE.is_match(title) {
        return ChannelCompany {
            channel_id: channel_id.to_string(),
            company_name: Some(
                title
                    .split('.')
                    .next()
                    .unwrap_or(title)
                    .replace('-', " ")
                    .to_string(),
            ),
            company_domain: Some(title.to_lowercase()),
            channel_type: Some("brand".to_string()),
            confidence: 0.8,
            reasoning: Some("channel title is a bare domain".to_string()),
        };
    }

    ChannelCompany {
        channel_id: channel_id.to_string(),
        company_name: if title.is_empty() {
            None
        } else {
            Some(title.to_string())
        },
        company_domain: None,
        channel_type: Some("unknown".to_string()),
        confidence: 0.3,
        reasoning: Some("no reliable company signal in channel metadata".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_like_title_resolves_to_that_domain() {
        let context = ChannelContext {
            channel_title: "acme-tools.com".to_string(),
            ..ChannelContext::default()
        };
        let mapping = rule_based_mapping("UC1", &context);
        assert_eq!(mapping.company_domain.as_deref(), Some("acme-tools.com"));
        assert_eq!(mapping.company_name.as_deref(), Some("acme tools"));
        assert!(mapping.confidence >= 0.7);
    }

    #[test]
    fn plain_title_yields_low_confidence_name_only() {
        let context = ChannelContext {
            channel_title: "Tech Reviews Daily".to_string(),
            ..ChannelContext::default()
        };
        let mapping = rule_based_mapping("UC2", &context);
        assert_eq!(mapping.company_name.as_deref(), Some("Tech Reviews Daily"));
        assert!(mapping.company_domain.is_none());
        assert!(mapping.confidence < 0.7);
    }

    #[test]
    fn empty_title_maps_to_nothing() {
        let mapping = rule_based_mapping("UC3", &ChannelContext::default());
        assert!(mapping.company_name.is_none());
        assert!(mapping.company_domain.is_none());
    }
}
