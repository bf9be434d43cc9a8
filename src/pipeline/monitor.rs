/// Completion wait for the content_analysis phase.
///
/// The phase handler does not analyze anything itself; the concurrent
/// analyzer has been running since scraping began. This waits on a predicate
/// over storage: all scraped pages analyzed and all referenced channels
/// resolved, with a flexible-completion escape hatch (high percentage or
/// long runtime) and a hard ceiling.
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::events::EventHub;
use crate::store::dao::content::ContentDao;
use crate::store::dao::video::VideoDao;

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub(crate) struct CompletionPolicy {
    /// analyzed/scraped percentage at which the phase may complete early.
    pub(crate) flexible_pct: f64,
    /// Wall-clock after which the percentage requirement is waived.
    pub(crate) flexible_after: Duration,
    /// Hard ceiling; the phase fails beyond this.
    pub(crate) hard_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct AnalysisWaitResult {
    pub(crate) success: bool,
    pub(crate) flexible_completion: bool,
    pub(crate) content_processed: i64,
    pub(crate) content_analyzed: i64,
    pub(crate) channels_total: i64,
    pub(crate) channels_resolved: i64,
    pub(crate) errors: Vec<String>,
}

impl AnalysisWaitResult {
    pub(crate) fn to_value(&self) -> Value {
        json!({
            "success": self.success,
            "flexible_completion": self.flexible_completion,
            "content_processed": self.content_processed,
            "content_analyzed": self.content_analyzed,
            "channels_total": self.channels_total,
            "channels_resolved": self.channels_resolved,
            "errors": self.errors,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AnalysisStats {
    total_scraped: i64,
    total_analyzed: i64,
    channels_total: i64,
    channels_resolved: i64,
}

impl AnalysisStats {
    fn pending_analysis(self) -> i64 {
        (self.total_scraped - self.total_analyzed).max(0)
    }

    fn channels_pending(self) -> i64 {
        (self.channels_total - self.channels_resolved).max(0)
    }

    fn completion_pct(self) -> f64 {
        if self.total_scraped == 0 {
            return 0.0;
        }
        self.total_analyzed as f64 / self.total_scraped as f64 * 100.0
    }
}

pub(crate) struct AnalysisCompletionWaiter {
    content_dao: ContentDao,
    video_dao: VideoDao,
    policy: CompletionPolicy,
}

impl AnalysisCompletionWaiter {
    pub(crate) fn new(content_dao: ContentDao, video_dao: VideoDao, policy: CompletionPolicy) -> Self {
        Self {
            content_dao,
            video_dao,
            policy,
        }
    }

    pub(crate) async fn wait(&self, run_id: Uuid, events: &EventHub) -> AnalysisWaitResult {
        let started = Utc::now();

        loop {
            let elapsed = (Utc::now() - started).to_std().unwrap_or(Duration::ZERO);
            let stats = match self.stats(run_id).await {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(%run_id, error = %err, "failed to read analysis stats");
                    AnalysisStats::default()
                }
            };

            if elapsed >= self.policy.hard_timeout {
                warn!(
                    %run_id,
                    analyzed = stats.total_analyzed,
                    scraped = stats.total_scraped,
                    "content analysis hit the hard timeout"
                );
                return AnalysisWaitResult {
                    success: false,
                    flexible_completion: false,
                    content_processed: stats.total_scraped,
                    content_analyzed: stats.total_analyzed,
                    channels_total: stats.channels_total,
                    channels_resolved: stats.channels_resolved,
                    errors: vec![format!(
                        "analysis/channel resolution timeout after {} seconds",
                        self.policy.hard_timeout.as_secs()
                    )],
                };
            }

            let all_analyzed = stats.total_scraped > 0 && stats.pending_analysis() == 0;
            let channels_done = stats.channels_pending() == 0;

            if all_analyzed && channels_done {
                info!(
                    %run_id,
                    analyzed = stats.total_analyzed,
                    channels = stats.channels_resolved,
                    "content analysis complete"
                );
                return AnalysisWaitResult {
                    success: true,
                    flexible_completion: false,
                    content_processed: stats.total_scraped,
                    content_analyzed: stats.total_analyzed,
                    channels_total: stats.channels_total,
                    channels_resolved: stats.channels_resolved,
                    errors: Vec::new(),
                };
            }

            // Flexible completion: nearly done or running long.
            if stats.total_scraped > 0 && stats.total_analyzed > 0 {
                let pct = stats.completion_pct();
                if pct >= self.policy.flexible_pct || elapsed >= self.policy.flexible_after {
                    info!(
                        %run_id,
                        analyzed = stats.total_analyzed,
                        scraped = stats.total_scraped,
                        pct,
                        "content analysis complete via flexible completion"
                    );
                    return AnalysisWaitResult {
                        success: true,
                        flexible_completion: true,
                        content_processed: stats.total_scraped,
                        content_analyzed: stats.total_analyzed,
                        channels_total: stats.channels_total,
                        channels_resolved: stats.channels_resolved,
                        errors: Vec::new(),
                    };
                }
            }

            events
                .status(
                    run_id,
                    format!(
                        "Analyzing content: {}/{} ({:.1}%) - pending {}; channels {}/{}",
                        stats.total_analyzed,
                        stats.total_scraped,
                        stats.completion_pct(),
                        stats.pending_analysis(),
                        stats.channels_resolved,
                        stats.channels_total,
                    ),
                )
                .await;

            sleep(CHECK_INTERVAL).await;
        }
    }

    async fn stats(&self, run_id: Uuid) -> Result<AnalysisStats> {
        let total_scraped = self.content_dao.count_scraped_completed(run_id).await?;
        let total_analyzed = self.content_dao.count_analyzed_for_run(run_id).await?;
        let channels = self.video_dao.channels_for_run(run_id).await?;
        let channels_resolved = self.video_dao.resolved_channels_for_run(run_id).await?;

        Ok(AnalysisStats {
            total_scraped,
            total_analyzed,
            channels_total: channels.len() as i64,
            channels_resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_pct_handles_zero_scraped() {
        let stats = AnalysisStats::default();
        assert!((stats.completion_pct() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pending_counts_never_go_negative() {
        let stats = AnalysisStats {
            total_scraped: 3,
            total_analyzed: 5,
            channels_total: 1,
            channels_resolved: 2,
        };
        assert_eq!(stats.pending_analysis(), 0);
        assert_eq!(stats.channels_pending(), 0);
    }

    #[test]
    fn flexible_threshold_scenario() {
        // 955 of 1000 analyzed: 95.5% clears a 95% flexible threshold.
        let stats = AnalysisStats {
            total_scraped: 1000,
            total_analyzed: 955,
            channels_total: 0,
            channels_resolved: 0,
        };
        assert!(stats.completion_pct() >= 95.0);
    }
}
