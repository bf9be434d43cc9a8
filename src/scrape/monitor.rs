/// Concurrent analysis monitor.
///
/// Runs alongside scraping: on a short interval it counts scraped pages with
/// no analysis row and schedules the difference under a semaphore. The
/// content_analysis phase handler later *waits* on the completion predicate
/// over storage; it never re-analyzes.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::scrape::analyzer::ContentAnalyzer;
use crate::store::dao::content::ContentDao;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) struct AnalysisMonitor {
    analyzer: Arc<ContentAnalyzer>,
    dao: ContentDao,
    semaphore: Arc<Semaphore>,
}

pub(crate) struct MonitorHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor to finish its in-flight work and stop scheduling.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "analysis monitor task panicked");
        }
    }
}

impl AnalysisMonitor {
    pub(crate) fn new(analyzer: Arc<ContentAnalyzer>, dao: ContentDao, concurrency: usize) -> Self {
        Self {
            analyzer,
            dao,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Start monitoring a run. The returned handle stops the loop.
    pub(crate) fn start(self: Arc<Self>, run_id: Uuid, project_id: Option<Uuid>) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(%run_id, "starting concurrent analysis monitor");

        let join = tokio::spawn(async move {
            self.run(run_id, project_id, stop_rx).await;
        });

        MonitorHandle {
            stop: stop_tx,
            join,
        }
    }

    async fn run(&self, run_id: Uuid, project_id: Option<Uuid>, stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }

            let batch_limit = (self.semaphore.available_permits().max(1) * 2) as i64;
            let pending = match self.dao.unanalyzed_for_run(run_id, batch_limit).await {
                Ok(pending) => pending,
                Err(err) => {
                    warn!(%run_id, error = %err, "failed to list unanalyzed content");
                    sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            if pending.is_empty() {
                sleep(POLL_INTERVAL).await;
                continue;
            }

            debug!(%run_id, count = pending.len(), "scheduling content analyses");

            let mut joins = Vec::with_capacity(pending.len());
            for (url, _domain, content) in pending {
                let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let analyzer = Arc::clone(&self.analyzer);
                joins.push(tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = analyzer.analyze(&url, &content, project_id).await {
                        warn!(url = %url, error = %err, "content analysis failed");
                    }
                }));
            }
            for join in joins {
                let _ = join.await;
            }
        }

        info!(%run_id, "analysis monitor stopped");
    }
}
