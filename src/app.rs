use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::error;

use crate::{
    api,
    clients::{
        ai::AiClient, browser::BrowserClient, company::CompanyApiClient,
        search::SearchProviderClient, video::VideoApiClient,
    },
    config::Config,
    dsi::calculator::DsiCalculator,
    enrich::{channel::ChannelCompanyResolver, company::CompanyEnricher, video::VideoEnricher},
    observability::Telemetry,
    pipeline::{config::PipelineConfig, events::EventHub, service::PipelineService},
    queue::{QueueStore, QueueWorker, worker},
    robustness::{
        circuit_breaker::{BreakerConfig, CircuitBreakerManager},
        retry::RetryManager,
        state_tracker::StateTracker,
    },
    scrape::{
        analyzer::{ContentAnalyzer, default_dimensions},
        monitor::AnalysisMonitor,
        scraper::WebScraper,
    },
    serp::collector::SerpBatchCollector,
    store::dao::{
        company::CompanyDao, content::ContentDao, keywords::KeywordDao, serp::SerpDao,
        video::VideoDao,
    },
    store::models::PipelineMode,
};

pub(crate) const PIPELINE_QUEUE: &str = "pipeline_jobs";

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    pipeline_service: Arc<PipelineService>,
    queue_store: Arc<QueueStore>,
    queue_worker: Arc<QueueWorker>,
    breaker_manager: Arc<CircuitBreakerManager>,
    retry_manager: Arc<RetryManager>,
    state_tracker: Arc<StateTracker>,
    events: Arc<EventHub>,
    pool: PgPool,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn pipeline_service(&self) -> Arc<PipelineService> {
        Arc::clone(&self.registry.pipeline_service)
    }

    pub(crate) fn queue_store(&self) -> Arc<QueueStore> {
        Arc::clone(&self.registry.queue_store)
    }

    pub(crate) fn breaker_manager(&self) -> Arc<CircuitBreakerManager> {
        Arc::clone(&self.registry.breaker_manager)
    }

    pub(crate) fn retry_manager(&self) -> Arc<RetryManager> {
        Arc::clone(&self.registry.retry_manager)
    }

    pub(crate) fn state_tracker(&self) -> Arc<StateTracker> {
        Arc::clone(&self.registry.state_tracker)
    }

    pub(crate) fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.registry.events)
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.registry.pool
    }
}

impl ComponentRegistry {
    /// Build the process-wide service container: one pool, one breaker
    /// manager, one retry manager, typed provider clients, and the pipeline
    /// service composed from them.
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections())
            .min_connections(config.db_min_connections())
            .acquire_timeout(config.db_acquire_timeout())
            .idle_timeout(Some(config.db_idle_timeout()))
            .max_lifetime(Some(config.db_max_lifetime()))
            .test_before_acquire(true)
            .connect_lazy(config.db_dsn())
            .context("failed to configure database connection pool")?;

        let breaker_config = BreakerConfig {
            failure_threshold: config.circuit_failure_threshold(),
            success_threshold: config.circuit_success_threshold(),
            timeout: config.circuit_timeout(),
            half_open_requests: 1,
        };
        let breaker_manager = Arc::new(CircuitBreakerManager::new(pool.clone(), breaker_config));
        let retry_manager = Arc::new(RetryManager::new(pool.clone()));
        let state_tracker = Arc::new(StateTracker::new(pool.clone()));
        let events = Arc::new(EventHub::new());

        let search_client = Arc::new(SearchProviderClient::new(
            config.search_provider_base_url(),
            config.search_provider_api_key(),
            config.search_provider_webhook_url(),
        )?);
        let ai_client = Arc::new(AiClient::new(
            config.ai_base_url(),
            config.ai_api_key(),
            config.ai_model(),
            config.ai_temperature(),
        )?);
        let company_client = Arc::new(CompanyApiClient::new(
            config.company_api_base_url(),
            config.company_api_key(),
            config.company_rate_limit_requests(),
            config.company_rate_limit_window(),
        )?);
        let video_client = Arc::new(VideoApiClient::new(
            config.video_api_base_url(),
            config.video_api_key(),
        )?);
        let browser_client = match config.browserless_base_url() {
            Some(base_url) => Some(Arc::new(BrowserClient::new(
                base_url,
                config.browserless_token(),
            )?)),
            None => None,
        };

        let collector = Arc::new(SerpBatchCollector::new(
            search_client,
            SerpDao::new(pool.clone()),
            KeywordDao::new(pool.clone()),
            Arc::clone(&state_tracker),
            breaker_manager.get("scale_serp").await,
            Arc::clone(&retry_manager),
            Arc::clone(&events),
            &config,
        ));

        let company_enricher = Arc::new(CompanyEnricher::new(
            company_client,
            Arc::clone(&ai_client),
            CompanyDao::new(pool.clone()),
            breaker_manager.get("company_enrichment").await,
            Arc::clone(&retry_manager),
            Arc::clone(&state_tracker),
            config.max_concurrent_enrichment(),
        ));

        let video_enricher = Arc::new(VideoEnricher::new(
            video_client,
            VideoDao::new(pool.clone()),
            breaker_manager.get("video_api").await,
            Arc::clone(&retry_manager),
            Arc::clone(&state_tracker),
            config.video_daily_quota_units(),
        ));

        let channel_resolver = Arc::new(ChannelCompanyResolver::new(
            pool.clone(),
            Arc::clone(&ai_client),
            config.channel_confidence_threshold(),
        ));

        let scraper = Arc::new(WebScraper::new(
            browser_client,
            ContentDao::new(pool.clone()),
            Arc::clone(&state_tracker),
            config.scraper_concurrent_limit(),
        )?);

        let analyzer = Arc::new(ContentAnalyzer::new(
            ai_client,
            ContentDao::new(pool.clone()),
            default_dimensions(),
        ));
        let analysis_monitor = Arc::new(AnalysisMonitor::new(
            analyzer,
            ContentDao::new(pool.clone()),
            config.max_concurrent_analysis(),
        ));

        let dsi = Arc::new(DsiCalculator::new(pool.clone()));

        let pipeline_service = PipelineService::new(
            Arc::clone(&config),
            pool.clone(),
            Arc::clone(&state_tracker),
            collector,
            company_enricher,
            video_enricher,
            channel_resolver,
            scraper,
            analysis_monitor,
            dsi,
            Arc::clone(&events),
        )
        .await;

        let queue_store = Arc::new(QueueStore::new(pool.clone(), PIPELINE_QUEUE));
        let mut queue_worker = QueueWorker::new(Arc::clone(&queue_store), 4);
        queue_worker.register_handler(
            "run_pipeline",
            run_pipeline_handler(Arc::clone(&pipeline_service)),
        );
        let queue_worker = Arc::new(queue_worker);

        Ok(Self {
            config,
            telemetry,
            pipeline_service,
            queue_store,
            queue_worker,
            breaker_manager,
            retry_manager,
            state_tracker,
            events,
            pool,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn pipeline_service(&self) -> Arc<PipelineService> {
        Arc::clone(&self.pipeline_service)
    }

    /// Spawn the queue worker loop.
    pub fn start_queue_worker(&self) -> tokio::task::JoinHandle<()> {
        let worker = Arc::clone(&self.queue_worker);
        tokio::spawn(async move {
            worker.run().await;
        })
    }

    /// Spawn the schedule daemon: startup resume scan plus the optional
    /// daily trigger loop.
    pub fn start_schedule_daemon(&self, scheduler_enabled: bool) -> tokio::task::JoinHandle<()> {
        crate::scheduler::daemon::spawn_schedule_daemon(
            Arc::clone(&self.pipeline_service),
            Arc::clone(&self.queue_store),
            scheduler_enabled,
        )
    }
}

/// Queue handler that starts a pipeline from a durable job payload.
fn run_pipeline_handler(service: Arc<PipelineService>) -> worker::JobHandler {
    worker::handler(move |payload: Value| {
        let service = Arc::clone(&service);
        async move {
            let config: PipelineConfig = payload
                .get("config")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .context("invalid pipeline config in job payload")?
                .unwrap_or_default();

            let mode = payload
                .get("mode")
                .and_then(Value::as_str)
                .and_then(PipelineMode::parse)
                .unwrap_or(PipelineMode::Scheduled);

            match service.start(config, mode).await {
                Ok(run_id) => {
                    tracing::info!(%run_id, "queued pipeline run started");
                    Ok(())
                }
                Err(err) => {
                    error!(error = %err, "queued pipeline run failed to start");
                    Err(err)
                }
            }
        }
    })
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
