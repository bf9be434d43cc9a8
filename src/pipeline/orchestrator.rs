/// Phase orchestrator: owns the dependency DAG and is, together with the
/// state tracker, the only writer of phase status rows.
///
/// The pipeline service registers one handler closure per phase at startup;
/// the orchestrator never calls back into the service.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::config::PipelineConfig;
use crate::pipeline::phases::PipelinePhase;
use crate::store::dao::content::ContentDao;
use crate::store::dao::phases::PhaseDao;
use crate::store::dao::serp::SerpDao;
use crate::store::dao::video::VideoDao;
use crate::store::models::PhaseState;

/// Context handed to every phase handler.
#[derive(Debug, Clone)]
pub(crate) struct PhaseContext {
    pub(crate) run_id: Uuid,
    pub(crate) config: Arc<PipelineConfig>,
}

pub(crate) type PhaseHandler =
    Arc<dyn Fn(PhaseContext) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static>;

/// Outcome of one orchestrated execution attempt.
#[derive(Debug, Clone)]
pub(crate) enum PhaseRun {
    Completed(Value),
    Skipped(String),
    Blocked(String),
}

pub(crate) struct PhaseOrchestrator {
    phase_dao: PhaseDao,
    serp_dao: SerpDao,
    content_dao: ContentDao,
    video_dao: VideoDao,
    handlers: RwLock<HashMap<PipelinePhase, PhaseHandler>>,
    // One phase transition at a time per orchestrator.
    execution_lock: Mutex<()>,
}

impl PhaseOrchestrator {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            phase_dao: PhaseDao::new(pool.clone()),
            serp_dao: SerpDao::new(pool.clone()),
            content_dao: ContentDao::new(pool.clone()),
            video_dao: VideoDao::new(pool),
            handlers: RwLock::new(HashMap::new()),
            execution_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn register_handler(&self, phase: PipelinePhase, handler: PhaseHandler) {
        info!(phase = phase.as_str(), "registered phase handler");
        self.handlers.write().await.insert(phase, handler);
    }

    /// Write one row per DAG phase: enabled phases become pending, the rest
    /// skipped. Terminal statuses of an existing run are preserved, so
    /// resuming never resets history.
    pub(crate) async fn initialize(
        &self,
        run_id: Uuid,
        enabled_phases: &[PipelinePhase],
    ) -> Result<()> {
        for phase in PipelinePhase::ALL {
            if enabled_phases.contains(&phase) {
                self.phase_dao
                    .upsert_initial(run_id, phase.as_str(), PhaseState::Pending, None)
                    .await?;
            } else {
                self.phase_dao
                    .upsert_initial(
                        run_id,
                        phase.as_str(),
                        PhaseState::Skipped,
                        Some(&json!({"skipped": true, "reason": "disabled in config"})),
                    )
                    .await?;
            }
        }
        info!(%run_id, enabled = enabled_phases.len(), "initialized pipeline phases");
        Ok(())
    }

    /// Whether a phase may enter `running`, with the refusal reason.
    pub(crate) async fn can_execute(
        &self,
        run_id: Uuid,
        phase: PipelinePhase,
    ) -> Result<(bool, Option<String>)> {
        let statuses = self.phase_dao.statuses_for_run(run_id).await?;

        match statuses.get(phase.as_str()) {
            None => return Ok((false, Some(format!("phase {} not initialized", phase.as_str())))),
            Some(PhaseState::Completed) => {
                return Ok((false, Some("phase already completed".to_string())));
            }
            Some(PhaseState::Running) => {
                return Ok((false, Some("phase already running".to_string())));
            }
            Some(PhaseState::Skipped) => {
                return Ok((false, Some("phase is skipped".to_string())));
            }
            Some(PhaseState::Blocked) => {
                return Ok((false, Some("phase is blocked".to_string())));
            }
            Some(PhaseState::Failed) => {
                return Ok((false, Some("phase already failed".to_string())));
            }
            Some(PhaseState::Pending | PhaseState::Queued) => {}
        }

        for predecessor in phase.predecessors() {
            match statuses.get(predecessor.as_str()) {
                Some(PhaseState::Skipped | PhaseState::Completed) => {}
                other => {
                    return Ok((
                        false,
                        Some(format!(
                            "dependency {} not completed (status: {})",
                            predecessor.as_str(),
                            other.map_or("missing", |s| s.as_str())
                        )),
                    ));
                }
            }
        }

        Ok((true, None))
    }

    /// Runtime preconditions over stored data, read from the database so
    /// they survive restarts. A database error is conservative: execution is
    /// allowed rather than deadlocking the run.
    pub(crate) async fn check_preconditions(
        &self,
        run_id: Uuid,
        phase: PipelinePhase,
    ) -> (bool, Option<String>) {
        let checked: Result<(bool, Option<String>)> = async {
            match phase {
                PipelinePhase::CompanyEnrichmentSerp => {
                    let serp_status = self
                        .phase_dao
                        .get_status(run_id, PipelinePhase::SerpCollection.as_str())
                        .await?;
                    if serp_status != Some(PhaseState::Completed) {
                        return Ok((false, Some("serp_phase_not_complete".to_string())));
                    }
                    if self.serp_dao.count_for_run(run_id).await? == 0 {
                        return Ok((false, Some("no_serp_results".to_string())));
                    }
                    Ok((true, None))
                }
                PipelinePhase::ContentScraping => {
                    if self.serp_dao.count_for_run(run_id).await? == 0 {
                        return Ok((false, Some("no_serp_results_for_scraping".to_string())));
                    }
                    Ok((true, None))
                }
                PipelinePhase::YoutubeEnrichment => {
                    if self.serp_dao.count_videos_for_run(run_id).await? == 0 {
                        return Ok((false, Some("no_video_serp_results".to_string())));
                    }
                    Ok((true, None))
                }
                PipelinePhase::ContentAnalysis => {
                    if !self.content_dao.analysis_ready().await? {
                        return Ok((false, Some("no_ready_content_for_analysis".to_string())));
                    }
                    Ok((true, None))
                }
                PipelinePhase::DsiCalculation => {
                    if !self.content_dao.any_analysis_exists().await? {
                        return Ok((false, Some("no_content_analysis_results".to_string())));
                    }
                    let channels = self.video_dao.channels_for_run(run_id).await?;
                    let resolved = self.video_dao.resolved_channels_for_run(run_id).await?;
                    if (channels.len() as i64) > resolved {
                        return Ok((
                            false,
                            Some("channel_company_resolution_pending".to_string()),
                        ));
                    }
                    Ok((true, None))
                }
                _ => Ok((true, None)),
            }
        }
        .await;

        match checked {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    phase = phase.as_str(),
                    error = %err,
                    "precondition check errored, allowing execution"
                );
                (true, None)
            }
        }
    }

    /// Execute one phase end to end: gate, mark running, invoke the
    /// registered handler, record the result.
    ///
    /// Handler failure on a critical phase marks it failed and cascades
    /// `blocked` to every pending descendant; non-critical phases are marked
    /// skipped with a reason instead.
    pub(crate) async fn execute(
        &self,
        run_id: Uuid,
        phase: PipelinePhase,
        context: PhaseContext,
    ) -> Result<PhaseRun> {
        let _guard = self.execution_lock.lock().await;

        let (can_run, reason) = self.can_execute(run_id, phase).await?;
        if !can_run {
            // content_analysis may run out-of-phase when scraped + enriched
            // data is already waiting.
            let allowed_out_of_phase = phase == PipelinePhase::ContentAnalysis
                && self.content_dao.analysis_ready().await.unwrap_or(false);
            if !allowed_out_of_phase {
                return Err(anyhow!(
                    "cannot execute phase {}: {}",
                    phase.as_str(),
                    reason.unwrap_or_default()
                ));
            }
        }

        let (preconditions_ok, block_reason) = self.check_preconditions(run_id, phase).await;
        if !preconditions_ok {
            let reason = block_reason.unwrap_or_else(|| "precondition failed".to_string());
            // Non-critical phases skip on unmet preconditions (a run with no
            // video results must not dead-end its descendants); critical
            // phases block.
            if phase.is_critical() {
                warn!(phase = phase.as_str(), %reason, "blocking phase");
                self.phase_dao
                    .set_status(
                        run_id,
                        phase.as_str(),
                        PhaseState::Blocked,
                        Some(&json!({"blocked_by": reason})),
                    )
                    .await?;
                return Ok(PhaseRun::Blocked(reason));
            }
            warn!(phase = phase.as_str(), %reason, "skipping non-critical phase");
            self.phase_dao
                .set_status(
                    run_id,
                    phase.as_str(),
                    PhaseState::Skipped,
                    Some(&json!({"skipped": true, "reason": reason})),
                )
                .await?;
            return Ok(PhaseRun::Skipped(reason));
        }

        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&phase)
                .cloned()
                .ok_or_else(|| anyhow!("no handler registered for phase {}", phase.as_str()))?
        };

        self.phase_dao
            .set_status(run_id, phase.as_str(), PhaseState::Running, None)
            .await?;
        info!(%run_id, phase = phase.as_str(), "starting phase");

        match handler(context).await {
            // A handler may declare its own skip (e.g. DSI with missing
            // predecessor data): skipped with reasons, never failed.
            Ok(result) if result.get("skipped").and_then(Value::as_bool) == Some(true) => {
                let reason = result
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("skipped by handler")
                    .to_string();
                warn!(%run_id, phase = phase.as_str(), %reason, "phase skipped by handler");
                self.phase_dao
                    .set_status(run_id, phase.as_str(), PhaseState::Skipped, Some(&result))
                    .await?;
                Ok(PhaseRun::Skipped(reason))
            }
            Ok(result) => {
                self.phase_dao
                    .set_status(run_id, phase.as_str(), PhaseState::Completed, Some(&result))
                    .await?;
                info!(%run_id, phase = phase.as_str(), "completed phase");
                Ok(PhaseRun::Completed(result))
            }
            Err(err) if !phase.is_critical() => {
                let reason = format!("{err:#} (non-critical)");
                warn!(%run_id, phase = phase.as_str(), error = %err, "non-critical phase skipped");
                self.phase_dao
                    .set_status(
                        run_id,
                        phase.as_str(),
                        PhaseState::Skipped,
                        Some(&json!({"skipped": true, "reason": reason})),
                    )
                    .await?;
                Ok(PhaseRun::Skipped(reason))
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(%run_id, phase = phase.as_str(), error = %message, "phase failed");
                self.phase_dao
                    .set_status(
                        run_id,
                        phase.as_str(),
                        PhaseState::Failed,
                        Some(&json!({"success": false, "error": message})),
                    )
                    .await?;
                self.block_dependents(run_id, phase).await?;
                Err(err)
            }
        }
    }

    /// Cascade: every pending descendant of a failed phase becomes blocked.
    async fn block_dependents(&self, run_id: Uuid, failed: PipelinePhase) -> Result<()> {
        let statuses = self.phase_dao.statuses_for_run(run_id).await?;
        let mut queue = failed.dependents();
        let mut blocked = Vec::new();

        while let Some(phase) = queue.pop() {
            if statuses.get(phase.as_str()) == Some(&PhaseState::Pending)
                && !blocked.contains(&phase)
            {
                self.phase_dao
                    .set_status(
                        run_id,
                        phase.as_str(),
                        PhaseState::Blocked,
                        Some(&json!({"blocked_by": failed.as_str()})),
                    )
                    .await?;
                blocked.push(phase);
                queue.extend(phase.dependents());
            }
        }

        if !blocked.is_empty() {
            warn!(
                %run_id,
                failed = failed.as_str(),
                blocked = ?blocked.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                "blocked dependent phases"
            );
        }
        Ok(())
    }

    /// Next phase whose dependencies are satisfied, in DAG order.
    pub(crate) async fn next_executable(&self, run_id: Uuid) -> Result<Option<PipelinePhase>> {
        let statuses = self.phase_dao.statuses_for_run(run_id).await?;
        for phase in PipelinePhase::ALL {
            if statuses.get(phase.as_str()) == Some(&PhaseState::Pending) {
                let (can_run, _) = self.can_execute(run_id, phase).await?;
                if can_run {
                    return Ok(Some(phase));
                }
            }
        }
        Ok(None)
    }

    /// Per-run execution summary: counts, timings, and stored results.
    pub(crate) async fn summary(&self, run_id: Uuid) -> Result<Value> {
        let rows = self.phase_dao.rows_for_run(run_id).await?;

        let count = |state: PhaseState| rows.iter().filter(|row| row.status == state).count();

        let details: serde_json::Map<String, Value> = rows
            .iter()
            .map(|row| {
                let duration_seconds = match (row.started_at, row.completed_at) {
                    (Some(start), Some(end)) => {
                        Some((end - start).num_milliseconds() as f64 / 1000.0)
                    }
                    _ => None,
                };
                (
                    row.phase_name.clone(),
                    json!({
                        "status": row.status.as_str(),
                        "result": row.result_data,
                        "started_at": row.started_at,
                        "completed_at": row.completed_at,
                        "duration_seconds": duration_seconds,
                    }),
                )
            })
            .collect();

        Ok(json!({
            "total_phases": rows.len(),
            "completed": count(PhaseState::Completed),
            "failed": count(PhaseState::Failed),
            "blocked": count(PhaseState::Blocked),
            "skipped": count(PhaseState::Skipped),
            "pending": count(PhaseState::Pending),
            "phase_details": details,
        }))
    }

    pub(crate) async fn statuses(&self, run_id: Uuid) -> Result<HashMap<String, PhaseState>> {
        self.phase_dao.statuses_for_run(run_id).await
    }
}
