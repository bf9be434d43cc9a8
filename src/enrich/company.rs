/// Company enrichment worker: bounded fan-out over the company provider.
///
/// Per domain: normalize to the registrable domain, check caches, search
/// candidates, pick the operating brand, redeem full details, classify the
/// source type, then upsert the profile and its alias row. A provider miss
/// still produces a fallback profile so downstream joins keep working.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::ai::AiClient;
use crate::clients::company::{
    CompanyApiClient, CompanyCandidate, employee_range, revenue_range,
};
use crate::robustness::circuit_breaker::CircuitBreaker;
use crate::robustness::retry::RetryManager;
use crate::robustness::state_tracker::{StateTracker, WorkItem};
use crate::store::dao::company::CompanyDao;
use crate::store::models::{CompanyProfile, SourceType};
use crate::util::domain::{domain_leading_label, registrable_domain};

/// Run-scoped classification context: who the client is and who they
/// compete with.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientContext {
    pub(crate) client_name: String,
    pub(crate) owned_domains: Vec<String>,
    pub(crate) competitor_domains: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EnrichmentOutcome {
    pub(crate) domains_processed: usize,
    pub(crate) companies_enriched: usize,
    pub(crate) failed: usize,
    pub(crate) errors: Vec<String>,
}

pub(crate) struct CompanyEnricher {
    api: Arc<CompanyApiClient>,
    ai: Arc<AiClient>,
    dao: CompanyDao,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryManager>,
    state_tracker: Arc<StateTracker>,
    semaphore: Arc<Semaphore>,
    cache: RwLock<HashMap<String, CompanyProfile>>,
    // domain -> parent domain reported by the AI classifier.
    detected_parent: RwLock<HashMap<String, String>>,
}

impl CompanyEnricher {
    pub(crate) fn new(
        api: Arc<CompanyApiClient>,
        ai: Arc<AiClient>,
        dao: CompanyDao,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryManager>,
        state_tracker: Arc<StateTracker>,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            ai,
            dao,
            breaker,
            retry,
            state_tracker,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cache: RwLock::new(HashMap::new()),
            detected_parent: RwLock::new(HashMap::new()),
        }
    }

    /// Enrich every domain, skipping ones that already have profiles.
    pub(crate) async fn enrich_domains(
        self: &Arc<Self>,
        run_id: Uuid,
        domains: &[String],
        context: &ClientContext,
    ) -> Result<EnrichmentOutcome> {
        let existing = self.dao.existing_domains(domains).await?;
        let existing: std::collections::HashSet<&String> = existing.iter().collect();
        let to_enrich: Vec<String> = domains
            .iter()
            .filter(|domain| !existing.contains(domain))
            .cloned()
            .collect();

        info!(
            total = domains.len(),
            already_enriched = existing.len(),
            to_process = to_enrich.len(),
            "company enrichment starting"
        );

        let items: Vec<WorkItem> = to_enrich.iter().cloned().map(WorkItem::Domain).collect();
        self.state_tracker
            .initialize(run_id, "company_enrichment_serp", &items)
            .await?;

        let mut outcome = EnrichmentOutcome {
            domains_processed: domains.len(),
            ..EnrichmentOutcome::default()
        };

        let mut tasks = FuturesUnordered::new();
        for domain in to_enrich {
            let enricher = Arc::clone(self);
            let context = context.clone();
            tasks.push(async move {
                let _permit = enricher.semaphore.acquire().await;
                let result = enricher.enrich_one(&domain, &context).await;
                (domain, result)
            });
        }

        let pending = self
            .state_tracker
            .get_pending(run_id, "company_enrichment_serp", i64::MAX)
            .await?;
        let state_ids: HashMap<String, Uuid> = pending
            .into_iter()
            .map(|item| (item.item_identifier, item.id))
            .collect();

        while let Some((domain, result)) = tasks.next().await {
            let state_id = state_ids.get(&domain).copied();
            match result {
                Ok(()) => {
                    outcome.companies_enriched += 1;
                    if let Some(state_id) = state_id {
                        let _ = self.state_tracker.mark_processing(state_id).await;
                        let _ = self.state_tracker.mark_completed(state_id, None).await;
                    }
                }
                Err(err) => {
                    outcome.failed += 1;
                    let message = format!("{domain}: {err:#}");
                    warn!(domain = %domain, error = %err, "company enrichment failed");
                    if let Some(state_id) = state_id {
                        let _ = self.state_tracker.mark_processing(state_id).await;
                        let _ = self
                            .state_tracker
                            .mark_failed(state_id, &message, None)
                            .await;
                    }
                    outcome.errors.push(message);
                }
            }
        }

        info!(
            enriched = outcome.companies_enriched,
            failed = outcome.failed,
            "company enrichment finished"
        );
        Ok(outcome)
    }

    async fn enrich_one(&self, original_domain: &str, context: &ClientContext) -> Result<()> {
        let cleaned = registrable_domain(original_domain);

        // Process-local cache first, then the shared store.
        if self.cache.read().await.contains_key(original_domain) {
            debug!(domain = original_domain, "company cache hit");
            return Ok(());
        }
        if let Some(stored) = self.dao.get(original_domain).await? {
            debug!(domain = original_domain, "company profile already stored");
            self.cache
                .write()
                .await
                .insert(original_domain.to_string(), stored);
            return Ok(());
        }

        let candidates = if self.api.is_configured() {
            let api = Arc::clone(&self.api);
            let cleaned_for_call = cleaned.clone();
            self.retry
                .retry_with_backoff(
                    || {
                        let api = Arc::clone(&api);
                        let domain = cleaned_for_call.clone();
                        self.breaker
                            .call(move || async move { api.search_by_domain(&domain).await })
                    },
                    "company_enrichment",
                    original_domain,
                    None,
                )
                .await
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let profile = if candidates.is_empty() {
            self.fallback_profile(original_domain, context)
        } else {
            let best = self.select_best_candidate(&candidates, &cleaned).await;
            let details = if self.api.is_configured() {
                let api = Arc::clone(&self.api);
                let ids = vec![best.id.clone()];
                self.retry
                    .retry_with_backoff(
                        || {
                            let api = Arc::clone(&api);
                            let ids = ids.clone();
                            self.breaker
                                .call(move || async move { api.redeem(&ids).await })
                        },
                        "company_enrichment",
                        &format!("redeem:{original_domain}"),
                        None,
                    )
                    .await
                    .ok()
                    .and_then(|mut details| details.pop())
            } else {
                None
            };

            let mut profile = match details {
                Some(details) => CompanyProfile {
                    domain: original_domain.to_string(),
                    company_name: details.name,
                    industry: details.industry,
                    employee_range: employee_range(details.employees),
                    revenue_range: revenue_range(details.revenue),
                    description: details.description,
                    source: "provider".to_string(),
                    source_type: SourceType::Other,
                    confidence_score: 0.9,
                    technologies: details.technologies,
                    social_profiles: details.social_profiles,
                    headquarters_location: details.headquarters_location,
                },
                None => CompanyProfile {
                    domain: original_domain.to_string(),
                    company_name: best.name.clone(),
                    industry: best.industry.clone(),
                    employee_range: employee_range(best.employees),
                    revenue_range: None,
                    description: best.description.clone(),
                    source: "provider_search".to_string(),
                    source_type: SourceType::Other,
                    confidence_score: 0.6,
                    technologies: Vec::new(),
                    social_profiles: Value::Null,
                    headquarters_location: None,
                },
            };

            profile.source_type = self.classify_source_type(&profile, original_domain, context).await;
            profile
        };

        self.dao.upsert_profile(&profile).await?;
        if cleaned != original_domain {
            self.dao.add_alias(&cleaned, original_domain).await?;
        }

        // Parent relationships surface during classification (e.g. a brand
        // owned by a competitor's holding company); persist when detected.
        if let Some(parent_domain) = self.detected_parent.write().await.remove(original_domain) {
            if parent_domain != original_domain {
                self.dao.set_parent(original_domain, &parent_domain).await?;
            }
        }

        self.cache
            .write()
            .await
            .insert(original_domain.to_string(), profile);
        Ok(())
    }

    /// Prefer the operating brand over holding companies. With an AI ranker
    /// available it gets the decision; the deterministic fallback prefers a
    /// candidate whose name contains the domain's leading label.
    async fn select_best_candidate<'a>(
        &self,
        candidates: &'a [CompanyCandidate],
        domain: &str,
    ) -> &'a CompanyCandidate {
        if candidates.len() == 1 {
            return &candidates[0];
        }

        if self.ai.is_configured() {
            if let Some(choice) = self.ai_select_candidate(candidates, domain).await {
                return choice;
            }
        }

        let leading = domain.split('.').next().unwrap_or(domain).to_lowercase();
        candidates
            .iter()
            .find(|candidate| candidate.name.to_lowercase().contains(&leading))
            .unwrap_or(&candidates[0])
    }

    async fn ai_select_candidate<'a>(
        &self,
        candidates: &'a [CompanyCandidate],
        domain: &str,
    ) -> Option<&'a CompanyCandidate> {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                format!(
                    "Company {}: {} — industry: {}, description: {}",
                    idx + 1,
                    candidate.name,
                    candidate.industry.as_deref().unwrap_or("unknown"),
                    candidate
                        .description
                        .as_deref()
                        .unwrap_or("none")
                        .chars()
                        .take(200)
                        .collect::<String>(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let schema = json!({
            "type": "object",
            "required": ["selected_company_number"],
            "properties": {
                "selected_company_number": {"type": "integer"},
                "reasoning": {"type": "string"}
            }
        });

        let user = format!(
            "The domain \"{domain}\" matched {count} company profiles. Select the one most \
             aligned with the domain's operating brand. Prefer the operating company over \
             holding companies, investors, or corporate parents.\n\n{listing}\n\n\
             Return JSON: {{\"selected_company_number\": 1-{count}, \"reasoning\": \"...\"}}",
            count = candidates.len(),
        );

        match self
            .ai
            .structured_json(
                "You identify which company profile best represents a domain's brand. \
                 Always return valid JSON.",
                &user,
                &schema,
                Some(300),
            )
            .await
        {
            Ok(value) => {
                let selected = value
                    .get("selected_company_number")
                    .and_then(Value::as_i64)
                    .unwrap_or(1);
                let index = usize::try_from(selected.max(1)).unwrap_or(1) - 1;
                candidates.get(index).or_else(|| candidates.first())
            }
            Err(err) => {
                warn!(domain, error = %err, "AI candidate selection failed, using fallback");
                None
            }
        }
    }

    /// Deterministic first: owned and competitor domains match exactly.
    /// Otherwise consult the AI classifier with a rule-based fallback.
    async fn classify_source_type(
        &self,
        profile: &CompanyProfile,
        domain: &str,
        context: &ClientContext,
    ) -> SourceType {
        if context.owned_domains.iter().any(|owned| owned == domain) {
            return SourceType::Owned;
        }
        if context
            .competitor_domains
            .iter()
            .any(|competitor| competitor == domain)
        {
            return SourceType::Competitor;
        }

        if self.ai.is_configured() {
            if let Some(classified) = self.ai_classify(profile, domain, context).await {
                return classified;
            }
        }

        rule_based_source_type(profile, domain, context)
    }

    async fn ai_classify(
        &self,
        profile: &CompanyProfile,
        domain: &str,
        context: &ClientContext,
    ) -> Option<SourceType> {
        let schema = json!({
            "type": "object",
            "required": ["source_type"],
            "properties": {
                "source_type": {"type": "string"},
                "parent_company_domain": {"type": ["string", "null"]}
            }
        });

        let user = format!(
            "Classify the content source type of this company for a competitive \
             intelligence analysis.\n\nClient: {} (domains: {})\nCompetitor domains: {}\n\n\
             Company being classified:\n- Domain: {domain}\n- Name: {}\n- Industry: {}\n- \
             Description: {}\n\nOptions: OWNED, COMPETITOR, PREMIUM_PUBLISHER, TECHNOLOGY, \
             FINANCE, PROFESSIONAL_BODY, SOCIAL_MEDIA, EDUCATION, NON_PROFIT, GOVERNMENT, \
             OTHER.\nIf the description indicates a parent or holding company with a known \
             domain, include it as parent_company_domain.\n\
             Return JSON: {{\"source_type\": \"...\", \"parent_company_domain\": null}}",
            context.client_name,
            context.owned_domains.join(", "),
            context.competitor_domains.join(", "),
            profile.company_name,
            profile.industry.as_deref().unwrap_or("unknown"),
            profile
                .description
                .as_deref()
                .unwrap_or("none")
                .chars()
                .take(300)
                .collect::<String>(),
        );

        match self
            .ai
            .structured_json(
                "You classify companies into content source types. Return only valid JSON.",
                &user,
                &schema,
                Some(100),
            )
            .await
        {
            Ok(value) => {
                if let Some(parent) = value
                    .get("parent_company_domain")
                    .and_then(Value::as_str)
                    .filter(|parent| !parent.is_empty())
                {
                    self.detected_parent
                        .write()
                        .await
                        .insert(domain.to_string(), registrable_domain(parent));
                }
                value
                    .get("source_type")
                    .and_then(Value::as_str)
                    .and_then(SourceType::parse)
            }
            Err(err) => {
                warn!(domain, error = %err, "AI classification failed, using rules");
                None
            }
        }
    }

    fn fallback_profile(&self, original_domain: &str, context: &ClientContext) -> CompanyProfile {
        let mut profile = CompanyProfile {
            domain: original_domain.to_string(),
            company_name: domain_leading_label(original_domain),
            industry: None,
            employee_range: None,
            revenue_range: None,
            description: None,
            source: "fallback".to_string(),
            source_type: SourceType::Other,
            confidence_score: 0.2,
            technologies: Vec::new(),
            social_profiles: Value::Null,
            headquarters_location: None,
        };
        profile.source_type = rule_based_source_type(&profile, original_domain, context);
        profile
    }
}

/// Rule-based classification over industry keywords and domain suffixes.
#[must_use]
pub(crate) fn rule_based_source_type(
    profile: &CompanyProfile,
    domain: &str,
    context: &ClientContext,
) -> SourceType {
    let company_name = profile.company_name.to_lowercase();
    let client_name = context.client_name.to_lowercase();
    if client_name.len() > 3 && company_name.contains(&client_name) {
        return SourceType::Owned;
    }

    if let Some(industry) = &profile.industry {
        let industry = industry.to_lowercase();
        if ["media", "publishing", "news", "journal"]
            .iter()
            .any(|kw| industry.contains(kw))
        {
            return SourceType::PremiumPublisher;
        }
        if ["education", "university", "academic"]
            .iter()
            .any(|kw| industry.contains(kw))
        {
            return SourceType::Education;
        }
        if industry.contains("government") || industry.contains("public sector") {
            return SourceType::Government;
        }
        if ["non-profit", "nonprofit", "charity"]
            .iter()
            .any(|kw| industry.contains(kw))
        {
            return SourceType::NonProfit;
        }
        if ["software", "technology", "information technology", "saas"]
            .iter()
            .any(|kw| industry.contains(kw))
        {
            return SourceType::Technology;
        }
        if ["banking", "financial", "insurance", "finance"]
            .iter()
            .any(|kw| industry.contains(kw))
        {
            return SourceType::Finance;
        }
    }

    let domain = domain.to_lowercase();
    if domain.ends_with(".gov") || domain.contains("government") {
        return SourceType::Government;
    }
    if domain.ends_with(".edu")
        || ["university", "college", "academic"]
            .iter()
            .any(|kw| domain.contains(kw))
    {
        return SourceType::Education;
    }
    if ["news", "media", "press", "journal", "magazine", "times", "post"]
        .iter()
        .any(|kw| domain.contains(kw))
    {
        return SourceType::PremiumPublisher;
    }
    if domain.ends_with(".org")
        || ["association", "institute", "foundation", "society"]
            .iter()
            .any(|kw| domain.contains(kw))
    {
        return SourceType::ProfessionalBody;
    }

    SourceType::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, industry: Option<&str>) -> CompanyProfile {
        CompanyProfile {
            domain: "example.com".to_string(),
            company_name: name.to_string(),
            industry: industry.map(ToString::to_string),
            employee_range: None,
            revenue_range: None,
            description: None,
            source: "test".to_string(),
            source_type: SourceType::Other,
            confidence_score: 0.5,
            technologies: Vec::new(),
            social_profiles: Value::Null,
            headquarters_location: None,
        }
    }

    #[test]
    fn client_name_match_classifies_owned() {
        let context = ClientContext {
            client_name: "Acme".to_string(),
            ..ClientContext::default()
        };
        let result = rule_based_source_type(
            &profile("Acme Analytics", None),
            "acme-analytics.com",
            &context,
        );
        assert_eq!(result, SourceType::Owned);
    }

    #[test]
    fn industry_keywords_beat_domain_suffixes() {
        let context = ClientContext::default();
        assert_eq!(
            rule_based_source_type(&profile("Daily Wire", Some("News Media")), "dw.org", &context),
            SourceType::PremiumPublisher
        );
        assert_eq!(
            rule_based_source_type(
                &profile("State U", Some("Higher Education")),
                "stateu.com",
                &context
            ),
            SourceType::Education
        );
    }

    #[test]
    fn domain_suffixes_classify_public_sector() {
        let context = ClientContext::default();
        assert_eq!(
            rule_based_source_type(&profile("Revenue Service", None), "irs.gov", &context),
            SourceType::Government
        );
        assert_eq!(
            rule_based_source_type(&profile("Standards Body", None), "ieee.org", &context),
            SourceType::ProfessionalBody
        );
    }

    #[test]
    fn unmatched_domains_default_to_other() {
        let context = ClientContext::default();
        assert_eq!(
            rule_based_source_type(&profile("Mystery Co", None), "mystery.io", &context),
            SourceType::Other
        );
    }
}
