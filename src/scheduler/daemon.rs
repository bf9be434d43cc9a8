use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info};

use crate::pipeline::service::PipelineService;
use crate::queue::{QueueStore, types::NewJob};
use crate::scheduler::cadence::DailyCadence;

const SCHEDULED_RUN_HOUR: u32 = 4;
const SCHEDULED_RUN_MINUTE: u32 = 0;

/// On startup, resume every run the previous process left in `running`,
/// then (when the scheduler is enabled) enqueue one scheduled run per day.
pub(crate) fn spawn_schedule_daemon(
    service: Arc<PipelineService>,
    queue: Arc<QueueStore>,
    scheduler_enabled: bool,
) -> JoinHandle<()> {
    let cadence = DailyCadence::new(SCHEDULED_RUN_HOUR, SCHEDULED_RUN_MINUTE);

    tokio::spawn(async move {
        match service.resume_running_on_startup().await {
            Ok(0) => info!("no interrupted pipelines to resume"),
            Ok(count) => info!(count, "resumed interrupted pipelines"),
            Err(err) => error!(error = %err, "startup resume scan failed"),
        }

        if !scheduler_enabled {
            info!("serp scheduler disabled, daemon idle after resume scan");
            return;
        }

        loop {
            let now = Utc::now();
            let next = cadence.next_run_from(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                next_run_utc = %next.to_rfc3339(),
                wait_seconds = wait.as_secs(),
                "scheduled next automatic pipeline run"
            );
            sleep(wait).await;

            // Durable hand-off: the queue worker starts the pipeline, so a
            // crash between trigger and start loses nothing.
            let job = NewJob::new(
                "run_pipeline",
                json!({"config": {"schedule_frequency": "daily"}, "mode": "scheduled"}),
            );
            match queue.enqueue(job).await {
                Ok(job_id) => info!(%job_id, "enqueued scheduled pipeline run"),
                Err(err) => error!(error = %err, "failed to enqueue scheduled run"),
            }

            // Skip past the trigger instant before computing the next one.
            sleep(Duration::from_secs(60)).await;
        }
    })
}
