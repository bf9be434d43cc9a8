/// Prometheus metric families.
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};

#[derive(Debug, Clone)]
pub struct Metrics {
    // Counters
    pub pipelines_started: Counter,
    pub pipelines_completed: Counter,
    pub pipelines_failed: Counter,
    pub serp_results_stored: Counter,
    pub companies_enriched: Counter,
    pub videos_enriched: Counter,
    pub pages_scraped: Counter,
    pub pages_analyzed: Counter,
    pub circuit_breaker_trips: Counter,
    pub retries_total: Counter,
    pub jobs_completed: Counter,
    pub jobs_dead_lettered: Counter,

    // Histograms
    pub phase_duration: Histogram,
    pub batch_monitor_duration: Histogram,
    pub scrape_duration: Histogram,
    pub analysis_duration: Histogram,

    // Gauges
    pub active_pipelines: Gauge,
    pub queue_depth: Gauge,
}

impl Metrics {
    #[allow(clippy::too_many_lines)]
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            pipelines_started: register_counter_with_registry!(
                "dsi_pipelines_started_total",
                "Total number of pipeline runs started",
                registry
            )?,
            pipelines_completed: register_counter_with_registry!(
                "dsi_pipelines_completed_total",
                "Total number of pipeline runs completed",
                registry
            )?,
            pipelines_failed: register_counter_with_registry!(
                "dsi_pipelines_failed_total",
                "Total number of pipeline runs failed",
                registry
            )?,
            serp_results_stored: register_counter_with_registry!(
                "dsi_serp_results_stored_total",
                "Total number of SERP results stored",
                registry
            )?,
            companies_enriched: register_counter_with_registry!(
                "dsi_companies_enriched_total",
                "Total number of company profiles enriched",
                registry
            )?,
            videos_enriched: register_counter_with_registry!(
                "dsi_videos_enriched_total",
                "Total number of video snapshots enriched",
                registry
            )?,
            pages_scraped: register_counter_with_registry!(
                "dsi_pages_scraped_total",
                "Total number of pages scraped",
                registry
            )?,
            pages_analyzed: register_counter_with_registry!(
                "dsi_pages_analyzed_total",
                "Total number of pages analyzed",
                registry
            )?,
            circuit_breaker_trips: register_counter_with_registry!(
                "dsi_circuit_breaker_trips_total",
                "Total number of circuit breaker trips to open",
                registry
            )?,
            retries_total: register_counter_with_registry!(
                "dsi_retries_total",
                "Total number of retry attempts",
                registry
            )?,
            jobs_completed: register_counter_with_registry!(
                "dsi_jobs_completed_total",
                "Total number of queue jobs completed",
                registry
            )?,
            jobs_dead_lettered: register_counter_with_registry!(
                "dsi_jobs_dead_lettered_total",
                "Total number of queue jobs moved to dead letter",
                registry
            )?,
            phase_duration: register_histogram_with_registry!(
                "dsi_phase_duration_seconds",
                "Duration of pipeline phases",
                registry
            )?,
            batch_monitor_duration: register_histogram_with_registry!(
                "dsi_batch_monitor_duration_seconds",
                "Duration of SERP batch monitoring",
                registry
            )?,
            scrape_duration: register_histogram_with_registry!(
                "dsi_scrape_duration_seconds",
                "Duration of individual page scrapes",
                registry
            )?,
            analysis_duration: register_histogram_with_registry!(
                "dsi_analysis_duration_seconds",
                "Duration of individual content analyses",
                registry
            )?,
            active_pipelines: register_gauge_with_registry!(
                "dsi_active_pipelines",
                "Number of currently running pipelines",
                registry
            )?,
            queue_depth: register_gauge_with_registry!(
                "dsi_queue_depth",
                "Number of pending jobs in the queue",
                registry
            )?,
        })
    }
}
