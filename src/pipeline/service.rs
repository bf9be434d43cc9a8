/// Top-level pipeline service: composes the orchestrator, collectors,
/// enrichment workers, scraper, analyzer, and DSI calculator; exposes
/// start/resume/cancel; and derives the final run status from persisted
/// phase statuses.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use futures::future::join_all;
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::search::BatchSchedule;
use crate::config::Config;
use crate::dsi::calculator::DsiCalculator;
use crate::enrich::channel::ChannelCompanyResolver;
use crate::enrich::company::CompanyEnricher;
use crate::enrich::video::VideoEnricher;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::events::EventHub;
use crate::pipeline::monitor::{AnalysisCompletionWaiter, CompletionPolicy};
use crate::pipeline::orchestrator::{PhaseContext, PhaseOrchestrator, PhaseRun};
use crate::pipeline::phases::PipelinePhase;
use crate::robustness::state_tracker::{StateTracker, WorkItem};
use crate::scrape::monitor::{AnalysisMonitor, MonitorHandle};
use crate::scrape::scraper::WebScraper;
use crate::serp::collector::{BatchHandle, SerpBatchCollector};
use crate::store::dao::content::ContentDao;
use crate::store::dao::keywords::KeywordDao;
use crate::store::dao::phases::PhaseDao;
use crate::store::dao::runs::RunDao;
use crate::store::dao::serp::SerpDao;
use crate::store::models::{
    PhaseState, PipelineMode, PipelineRun, PipelineStatus, RunCounters, SerpKind,
};
use crate::util::json::bounded_phase_results;

/// Phase execution backends. Registered into the orchestrator as closures;
/// holds no reference to the service or the orchestrator.
pub(crate) struct PhaseExecutors {
    config: Arc<Config>,
    keyword_dao: KeywordDao,
    serp_dao: SerpDao,
    state_tracker: Arc<StateTracker>,
    collector: Arc<SerpBatchCollector>,
    company_enricher: Arc<CompanyEnricher>,
    video_enricher: Arc<VideoEnricher>,
    channel_resolver: Arc<ChannelCompanyResolver>,
    scraper: Arc<WebScraper>,
    analysis_monitor: Arc<AnalysisMonitor>,
    completion_waiter: Arc<AnalysisCompletionWaiter>,
    dsi: Arc<DsiCalculator>,
    events: Arc<EventHub>,
    active_monitors: Mutex<HashMap<Uuid, MonitorHandle>>,
}

impl PhaseExecutors {
    async fn keyword_metrics(&self, ctx: PhaseContext) -> Result<Value> {
        let keywords = match &ctx.config.keywords {
            Some(keywords) if !keywords.is_empty() => {
                self.keyword_dao.upsert_keywords(keywords).await?
            }
            _ => self.keyword_dao.all().await?,
        };

        let items: Vec<WorkItem> = keywords
            .iter()
            .flat_map(|keyword| {
                ctx.config.regions.iter().map(|region| WorkItem::KeywordRegion {
                    keyword: keyword.keyword.clone(),
                    region: region.clone(),
                })
            })
            .collect();
        self.state_tracker
            .initialize(ctx.run_id, "keyword_metrics", &items)
            .await?;

        let texts: Vec<String> = keywords.iter().map(|k| k.keyword.clone()).collect();
        let missing_metrics = self.keyword_dao.without_metrics(&texts).await?;

        Ok(json!({
            "success": true,
            "keywords_processed": keywords.len(),
            "keywords_with_metrics": keywords.len() - missing_metrics.len(),
            "keywords_missing_metrics": missing_metrics.len(),
        }))
    }

    async fn serp_collection(&self, ctx: PhaseContext) -> Result<Value> {
        let run_id = ctx.run_id;

        // Webhook-triggered runs ingest an already-completed provider batch.
        if let Some(batch_id) = &ctx.config.serp_batch_id {
            let kind = ctx
                .config
                .content_types
                .first()
                .copied()
                .unwrap_or(SerpKind::Organic);
            let links = ctx
                .config
                .serp_download_links
                .as_ref()
                .map(|value| crate::clients::search::SearchProviderClient::parse_download_links(value));

            let outcome = self
                .collector
                .process_webhook_batch(run_id, batch_id, kind, ctx.config.serp_result_set_id, links)
                .await?;

            return Ok(json!({
                "success": outcome.stored > 0,
                "webhook_batch": batch_id,
                "total_results": outcome.stored,
                "results_failed": outcome.failed,
                "keywords_processed": outcome.keywords_processed,
            }));
        }

        // Reuse a prior run's rows instead of calling the provider.
        if let Some(source_run) = ctx.config.reuse_serp_from_pipeline_id {
            let copied = self.serp_dao.copy_from_run(source_run, run_id).await?;
            if copied > 0 {
                info!(%run_id, %source_run, copied, "reused serp results from prior run");
                let keywords = self.serp_dao.keywords_processed_for_run(run_id).await?;
                return Ok(json!({
                    "success": true,
                    "reused_from": source_run,
                    "total_results": copied,
                    "keywords_processed": keywords,
                }));
            }
            warn!(%run_id, %source_run, "serp reuse found no rows, collecting fresh");
        }

        let keywords: Vec<String> = match &ctx.config.keywords {
            Some(keywords) if !keywords.is_empty() => keywords.clone(),
            _ => self
                .keyword_dao
                .all()
                .await?
                .into_iter()
                .map(|keyword| keyword.keyword)
                .collect(),
        };
        if keywords.is_empty() {
            return Err(anyhow!("no keywords available for serp collection"));
        }

        let schedule = BatchSchedule {
            frequency: ctx.config.schedule_frequency(),
            ..BatchSchedule::default()
        };

        // Content-type batches are created in parallel, then monitored
        // concurrently.
        let creations = join_all(ctx.config.content_types.iter().map(|kind| {
            let collector = Arc::clone(&self.collector);
            let keywords = keywords.clone();
            let regions = ctx.config.regions.clone();
            let schedule = schedule.clone();
            let is_initial = ctx.config.is_initial_run;
            let kind = *kind;
            async move {
                let handle = collector
                    .create_batch_only(run_id, kind, &keywords, &regions, &schedule, is_initial)
                    .await;
                (kind, handle)
            }
        }))
        .await;

        let mut handles: Vec<BatchHandle> = Vec::new();
        let mut type_results = Map::new();
        for (kind, creation) in creations {
            match creation {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {
                    type_results
                        .insert(kind.as_str().to_string(), json!({"success": true, "empty": true}));
                }
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, "batch creation failed");
                    type_results.insert(
                        kind.as_str().to_string(),
                        json!({"success": false, "error": format!("{err:#}")}),
                    );
                }
            }
        }

        if handles.is_empty() && !type_results.values().any(|v| v["success"] == true) {
            return Err(anyhow!("all serp batch creations failed"));
        }

        let monitors = join_all(handles.iter().map(|handle| {
            let collector = Arc::clone(&self.collector);
            async move { (handle.kind, collector.monitor_batch(run_id, handle).await) }
        }))
        .await;

        let mut total_stored = 0usize;
        let mut total_failed = 0usize;
        let mut keywords_processed = 0usize;
        for (kind, outcome) in monitors {
            match outcome {
                Ok(outcome) => {
                    total_stored += outcome.stored;
                    total_failed += outcome.failed;
                    keywords_processed = keywords_processed.max(outcome.keywords_processed);
                    type_results.insert(
                        kind.as_str().to_string(),
                        json!({"success": outcome.stored > 0, "results_stored": outcome.stored,
                               "results_failed": outcome.failed}),
                    );
                }
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, "batch monitoring failed");
                    type_results.insert(
                        kind.as_str().to_string(),
                        json!({"success": false, "error": format!("{err:#}")}),
                    );
                }
            }
        }

        if total_stored == 0 {
            return Err(anyhow!("serp collection stored no results"));
        }

        Ok(json!({
            "success": true,
            "discrete_batches": true,
            "total_results": total_stored,
            "results_failed": total_failed,
            "keywords_processed": keywords_processed,
            "content_type_results": Value::Object(type_results),
        }))
    }

    async fn company_enrichment(&self, ctx: PhaseContext) -> Result<Value> {
        let domains = self.serp_dao.distinct_domains_for_run(ctx.run_id).await?;
        if domains.is_empty() {
            return Ok(json!({
                "success": true,
                "domains_processed": 0,
                "companies_enriched": 0,
                "message": "no domains to enrich",
            }));
        }

        let outcome = self
            .company_enricher
            .enrich_domains(ctx.run_id, &domains, &ctx.config.client_context())
            .await?;

        Ok(json!({
            "success": true,
            "domains_processed": outcome.domains_processed,
            "companies_enriched": outcome.companies_enriched,
            "failed": outcome.failed,
            "errors": outcome.errors,
        }))
    }

    async fn youtube_enrichment(&self, ctx: PhaseContext) -> Result<Value> {
        let video_urls = self.serp_dao.video_urls_for_run(ctx.run_id).await?;
        let outcome = self.video_enricher.enrich_videos(ctx.run_id, &video_urls).await?;

        let mut channels_resolved = 0usize;
        let mut channels_total = 0usize;
        if self.config.channel_resolver_enabled() {
            match self.channel_resolver.resolve_for_run(ctx.run_id).await {
                Ok(resolution) => {
                    channels_resolved = resolution.resolved;
                    channels_total = resolution.channels_total;
                }
                Err(err) => {
                    warn!(run_id = %ctx.run_id, error = %err, "channel resolution failed");
                }
            }
        }

        let success_rate = outcome.success_rate();
        if outcome.failed > 0 {
            // Partial success is a skip, not a failure: the phase is
            // non-critical and DSI must still run.
            return Err(anyhow!(
                "low success rate: {success_rate:.1}% ({} enriched, {} cached, {} failed)",
                outcome.enriched,
                outcome.cached,
                outcome.failed
            ));
        }

        Ok(json!({
            "success": true,
            "videos_enriched": outcome.enriched,
            "videos_cached": outcome.cached,
            "total_videos": outcome.total_videos,
            "quota_used": outcome.quota_used,
            "success_rate": success_rate,
            "channels_total": channels_total,
            "channels_resolved": channels_resolved,
            "errors": outcome.errors,
        }))
    }

    async fn content_scraping(&self, ctx: PhaseContext) -> Result<Value> {
        // The analyzer runs concurrently with scraping from this point on.
        if ctx.config.enable_content_analysis {
            let handle = Arc::clone(&self.analysis_monitor).start(ctx.run_id, None);
            self.active_monitors.lock().await.insert(ctx.run_id, handle);
        }

        let urls = self.serp_dao.content_urls_for_run(ctx.run_id).await?;
        let outcome = self.scraper.scrape_urls(ctx.run_id, &urls).await?;

        Ok(json!({
            "success": true,
            "urls_total": outcome.urls_total,
            "urls_candidates": outcome.urls_candidates,
            "urls_scraped": outcome.urls_scraped,
            "urls_failed": outcome.urls_failed,
            "urls_reused": outcome.urls_reused,
        }))
    }

    async fn content_analysis(&self, ctx: PhaseContext) -> Result<Value> {
        let result = self.completion_waiter.wait(ctx.run_id, &self.events).await;

        // Stop the concurrent analyzer regardless of outcome.
        if let Some(handle) = self.active_monitors.lock().await.remove(&ctx.run_id) {
            handle.stop().await;
        }

        if !result.success || result.content_analyzed == 0 {
            return Err(anyhow!(
                "content analysis incomplete: {} of {} analyzed ({})",
                result.content_analyzed,
                result.content_processed,
                result.errors.join("; ")
            ));
        }

        Ok(result.to_value())
    }

    async fn dsi_calculation(&self, ctx: PhaseContext) -> Result<Value> {
        let outcome = self.dsi.calculate_for_run(ctx.run_id).await?;

        if outcome.skipped {
            return Ok(json!({
                "success": false,
                "skipped": true,
                "reason": "dependencies not met",
                "skip_reasons": outcome.skip_reasons,
            }));
        }

        Ok(json!({
            "success": true,
            "dsi_calculated": true,
            "companies_ranked": outcome.companies_ranked,
            "pages_ranked": outcome.pages_ranked,
        }))
    }
}

pub struct PipelineService {
    run_dao: RunDao,
    phase_dao: PhaseDao,
    orchestrator: Arc<PhaseOrchestrator>,
    events: Arc<EventHub>,
    cancelled: Mutex<HashSet<Uuid>>,
}

impl PipelineService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn new(
        config: Arc<Config>,
        pool: PgPool,
        state_tracker: Arc<StateTracker>,
        collector: Arc<SerpBatchCollector>,
        company_enricher: Arc<CompanyEnricher>,
        video_enricher: Arc<VideoEnricher>,
        channel_resolver: Arc<ChannelCompanyResolver>,
        scraper: Arc<WebScraper>,
        analysis_monitor: Arc<AnalysisMonitor>,
        dsi: Arc<DsiCalculator>,
        events: Arc<EventHub>,
    ) -> Arc<Self> {
        let completion_waiter = Arc::new(AnalysisCompletionWaiter::new(
            ContentDao::new(pool.clone()),
            crate::store::dao::video::VideoDao::new(pool.clone()),
            CompletionPolicy {
                flexible_pct: config.analysis_flex_completion_pct(),
                flexible_after: config.analysis_flex_completion_after(),
                hard_timeout: config.analysis_hard_timeout(),
            },
        ));

        let executors = Arc::new(PhaseExecutors {
            config: Arc::clone(&config),
            keyword_dao: KeywordDao::new(pool.clone()),
            serp_dao: SerpDao::new(pool.clone()),
            state_tracker,
            collector,
            company_enricher,
            video_enricher,
            channel_resolver,
            scraper,
            analysis_monitor,
            completion_waiter,
            dsi,
            events: Arc::clone(&events),
            active_monitors: Mutex::new(HashMap::new()),
        });

        let orchestrator = Arc::new(PhaseOrchestrator::new(pool.clone()));
        register_phase_handlers(&orchestrator, &executors).await;

        Arc::new(Self {
            run_dao: RunDao::new(pool.clone()),
            phase_dao: PhaseDao::new(pool),
            orchestrator,
            events,
            cancelled: Mutex::new(HashSet::new()),
        })
    }

    /// Start a new run. Returns immediately; execution continues in the
    /// background.
    pub async fn start(
        self: &Arc<Self>,
        mut config: PipelineConfig,
        mode: PipelineMode,
    ) -> Result<Uuid> {
        let mode = if config.testing_mode {
            PipelineMode::Testing
        } else {
            mode
        };
        config.apply_testing_mode();

        let run_id = Uuid::new_v4();
        let config_value =
            serde_json::to_value(&config).context("failed to serialize pipeline config")?;
        self.run_dao
            .insert(run_id, &config.client_id, mode, &config_value)
            .await?;

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.execute_run(run_id, config).await;
        });

        info!(%run_id, mode = mode.as_str(), "pipeline started");
        Ok(run_id)
    }

    /// Resume a run after a crash: completed phases stay completed, a stale
    /// running phase re-enters from its persisted state.
    pub async fn resume(self: &Arc<Self>, run_id: Uuid) -> Result<bool> {
        let Some(run) = self.run_dao.get(run_id).await? else {
            return Err(anyhow!("pipeline {run_id} not found"));
        };

        let config: PipelineConfig = serde_json::from_value(run.config.clone())
            .unwrap_or_default();

        self.run_dao.set_status(run_id, PipelineStatus::Running).await?;

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.execute_run(run_id, config).await;
        });

        info!(%run_id, "pipeline resumed");
        Ok(true)
    }

    /// Cooperative cancel: the loop checks the flag between phases;
    /// in-flight external calls complete so their results are stored.
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool> {
        let Some(run) = self.run_dao.get(run_id).await? else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }

        self.cancelled.lock().await.insert(run_id);
        self.run_dao.set_status(run_id, PipelineStatus::Cancelled).await?;
        self.events.status(run_id, "Pipeline cancelled").await;
        info!(%run_id, "pipeline cancelled");
        Ok(true)
    }

    pub async fn status(&self, run_id: Uuid) -> Result<Option<Value>> {
        let Some(run) = self.run_dao.get(run_id).await? else {
            return Ok(None);
        };
        let summary = self.orchestrator.summary(run_id).await?;
        let mut value = serde_json::to_value(&run).context("failed to serialize run")?;
        value["phases"] = summary;
        Ok(Some(value))
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        self.run_dao.recent(limit).await
    }

    pub async fn clear_all(&self) -> Result<u64> {
        self.run_dao.delete_all().await
    }

    pub fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.events)
    }

    /// Start a webhook-triggered run that ingests a completed provider
    /// batch instead of collecting.
    pub async fn start_webhook_run(
        self: &Arc<Self>,
        batch_id: String,
        result_set_id: Option<i64>,
        download_links: Option<Value>,
        content_type: Option<SerpKind>,
    ) -> Result<Uuid> {
        let mut config = PipelineConfig {
            serp_batch_id: Some(batch_id),
            serp_result_set_id: result_set_id,
            serp_download_links: download_links,
            ..PipelineConfig::default()
        };
        if let Some(kind) = content_type {
            config.content_types = vec![kind];
        }
        self.start(config, PipelineMode::Batch).await
    }

    /// On startup, re-enter any run the previous process left in `running`.
    pub async fn resume_running_on_startup(self: &Arc<Self>) -> Result<usize> {
        let running = self.run_dao.find_running().await?;
        let count = running.len();
        for run_id in running {
            info!(%run_id, "resuming pipeline left running by a previous process");
            if let Err(err) = self.resume(run_id).await {
                error!(%run_id, error = %err, "failed to resume pipeline");
            }
        }
        Ok(count)
    }

    async fn is_cancelled(&self, run_id: Uuid) -> bool {
        self.cancelled.lock().await.contains(&run_id)
    }

    async fn execute_run(self: Arc<Self>, run_id: Uuid, config: PipelineConfig) {
        if let Err(err) = self.run_dao.set_status(run_id, PipelineStatus::Running).await {
            error!(%run_id, error = %err, "failed to mark run running");
            return;
        }
        self.events.status(run_id, "Pipeline started").await;

        let enabled = config.enabled_phases();
        if let Err(err) = self.orchestrator.initialize(run_id, &enabled).await {
            error!(%run_id, error = %err, "failed to initialize phases");
            let _ = self.run_dao.set_status(run_id, PipelineStatus::Failed).await;
            return;
        }

        // A phase left `running` by a dead process re-enters from storage.
        if let Err(err) = self.reset_stale_running(run_id).await {
            warn!(%run_id, error = %err, "failed to reset stale running phases");
        }

        let context = PhaseContext {
            run_id,
            config: Arc::new(config.clone()),
        };
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        loop {
            if self.is_cancelled(run_id).await {
                info!(%run_id, "run cancelled, stopping phase loop");
                self.cancelled.lock().await.remove(&run_id);
                self.save_final_state(run_id, &errors, &warnings).await;
                return;
            }

            let next = match self.orchestrator.next_executable(run_id).await {
                Ok(Some(phase)) => phase,
                Ok(None) => break,
                Err(err) => {
                    error!(%run_id, error = %err, "failed to determine next phase");
                    errors.push(format!("{err:#}"));
                    break;
                }
            };

            self.events
                .status(run_id, format!("Starting phase: {}", next.as_str()))
                .await;

            match self.orchestrator.execute(run_id, next, context.clone()).await {
                Ok(PhaseRun::Completed(result)) => {
                    self.events
                        .progress(
                            run_id,
                            "phase_completed",
                            json!({"phase": next.as_str(), "result": result}),
                        )
                        .await;
                    self.update_counters(run_id, next, &result).await;
                }
                Ok(PhaseRun::Skipped(reason)) => {
                    warnings.push(format!("{}: {reason}", next.as_str()));
                    self.events
                        .progress(
                            run_id,
                            "phase_skipped",
                            json!({"phase": next.as_str(), "reason": reason}),
                        )
                        .await;
                }
                Ok(PhaseRun::Blocked(reason)) => {
                    warnings.push(format!("{} blocked: {reason}", next.as_str()));
                    self.events
                        .progress(
                            run_id,
                            "phase_blocked",
                            json!({"phase": next.as_str(), "reason": reason}),
                        )
                        .await;
                }
                Err(err) => {
                    let message = format!("{}: {err:#}", next.as_str());
                    errors.push(message.clone());
                    self.events
                        .progress(
                            run_id,
                            "phase_failed",
                            json!({"phase": next.as_str(), "error": message}),
                        )
                        .await;
                    // Descendants are blocked already; siblings may still run.
                }
            }
        }

        let final_status = match self.derive_final_status(run_id, &enabled).await {
            Ok(status) => status,
            Err(err) => {
                error!(%run_id, error = %err, "final status evaluation failed");
                PipelineStatus::Failed
            }
        };

        if let Err(err) = self.run_dao.set_status(run_id, final_status).await {
            error!(%run_id, error = %err, "failed to store final run status");
        }
        self.save_final_state(run_id, &errors, &warnings).await;

        let message = match final_status {
            PipelineStatus::Completed => "Pipeline completed successfully!".to_string(),
            status => format!("Pipeline finished with status: {}", status.as_str()),
        };
        self.events.status(run_id, message).await;
        info!(%run_id, status = final_status.as_str(), "pipeline finished");
    }

    /// Final status from persisted phase statuses: every enabled critical
    /// phase (serp_collection, content_scraping, content_analysis,
    /// dsi_calculation) must be completed. Non-critical phases never fail
    /// the run.
    async fn derive_final_status(
        &self,
        run_id: Uuid,
        enabled: &[PipelinePhase],
    ) -> Result<PipelineStatus> {
        let statuses = self.orchestrator.statuses(run_id).await?;

        let should_fail = enabled.iter().any(|phase| {
            phase.is_critical() && statuses.get(phase.as_str()) != Some(&PhaseState::Completed)
        });

        Ok(if should_fail {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Completed
        })
    }

    async fn reset_stale_running(&self, run_id: Uuid) -> Result<()> {
        let statuses = self.orchestrator.statuses(run_id).await?;
        for (phase_name, state) in statuses {
            if state == PhaseState::Running {
                warn!(%run_id, phase = %phase_name, "resetting stale running phase to pending");
                self.phase_dao
                    .set_status(run_id, &phase_name, PhaseState::Pending, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Counters are raised in real time after each phase, not only at the
    /// end of the run.
    async fn update_counters(&self, run_id: Uuid, phase: PipelinePhase, result: &Value) {
        let get = |key: &str| result.get(key).and_then(Value::as_i64).unwrap_or(0);

        let mut counters = RunCounters::default();
        match phase {
            PipelinePhase::KeywordMetrics | PipelinePhase::SerpCollection => {
                counters.keywords_processed = get("keywords_processed");
                counters.serp_results_collected = get("total_results");
            }
            PipelinePhase::CompanyEnrichmentSerp => {
                counters.companies_enriched = get("companies_enriched");
            }
            PipelinePhase::YoutubeEnrichment => {
                counters.videos_enriched = get("videos_enriched") + get("videos_cached");
            }
            PipelinePhase::ContentAnalysis => {
                counters.content_analyzed = get("content_analyzed");
            }
            PipelinePhase::DsiCalculation => {
                counters.landscapes_calculated = get("companies_ranked");
            }
            PipelinePhase::ContentScraping => {}
        }

        if let Err(err) = self.run_dao.raise_counters(run_id, &counters).await {
            warn!(%run_id, error = %err, "failed to update run counters");
        }
    }

    async fn save_final_state(&self, run_id: Uuid, errors: &[String], warnings: &[String]) {
        let phase_results = match self.phase_dao.rows_for_run(run_id).await {
            Ok(rows) => {
                let map: Map<String, Value> = rows
                    .into_iter()
                    .filter_map(|row| row.result_data.map(|data| (row.phase_name, data)))
                    .collect();
                bounded_phase_results(&map)
            }
            Err(err) => {
                warn!(%run_id, error = %err, "failed to collect phase results");
                Value::Null
            }
        };

        if let Err(err) = self
            .run_dao
            .save_phase_results(run_id, &phase_results, errors, warnings)
            .await
        {
            warn!(%run_id, error = %err, "failed to save phase results");
        }
    }
}

async fn register_phase_handlers(
    orchestrator: &Arc<PhaseOrchestrator>,
    executors: &Arc<PhaseExecutors>,
) {
    macro_rules! register {
        ($phase:expr, $method:ident) => {{
            let executors = Arc::clone(executors);
            orchestrator
                .register_handler(
                    $phase,
                    Arc::new(move |ctx: PhaseContext| {
                        let executors = Arc::clone(&executors);
                        Box::pin(async move { executors.$method(ctx).await })
                    }),
                )
                .await;
        }};
    }

    register!(PipelinePhase::KeywordMetrics, keyword_metrics);
    register!(PipelinePhase::SerpCollection, serp_collection);
    register!(PipelinePhase::CompanyEnrichmentSerp, company_enrichment);
    register!(PipelinePhase::YoutubeEnrichment, youtube_enrichment);
    register!(PipelinePhase::ContentScraping, content_scraping);
    register!(PipelinePhase::ContentAnalysis, content_analysis);
    register!(PipelinePhase::DsiCalculation, dsi_calculation);
}
