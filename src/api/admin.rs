use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;

pub(crate) async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue_store().stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to load queue stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RetryDeadLetterRequest {
    #[serde(default)]
    job_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
struct RetryDeadLetterResponse {
    requeued: u64,
}

pub(crate) async fn retry_dead_letter(
    State(state): State<AppState>,
    Json(request): Json<RetryDeadLetterRequest>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("retry_dead_letter");

    match state
        .queue_store()
        .retry_dead_letter(request.job_ids.as_deref())
        .await
    {
        Ok(requeued) => (StatusCode::OK, Json(RetryDeadLetterResponse { requeued })).into_response(),
        Err(err) => {
            error!(error = %err, "failed to requeue dead letter jobs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}

pub(crate) async fn circuit_breakers(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.breaker_manager().all_metrics().await;

    let body: Vec<_> = metrics
        .into_iter()
        .map(|(service, snapshot)| match snapshot {
            Ok(snapshot) => json!({
                "service_name": service,
                "state": snapshot.state.as_str(),
                "failure_count": snapshot.failure_count,
                "success_count": snapshot.success_count,
                "total_requests": snapshot.total_requests,
                "total_failures": snapshot.total_failures,
                "total_successes": snapshot.total_successes,
                "success_rate": snapshot.success_rate(),
                "opened_at": snapshot.opened_at,
            }),
            Err(err) => json!({"service_name": service, "error": format!("{err:#}")}),
        })
        .collect();

    (StatusCode::OK, Json(body))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResetFailedRequest {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    max_items: Option<i64>,
}

/// Bulk-reset failed work items of a run back to pending for re-processing.
pub(crate) async fn reset_failed_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResetFailedRequest>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("reset_failed_items");

    let tracker = state.state_tracker();
    match tracker
        .reset_failed(id, request.phase.as_deref(), request.max_items)
        .await
    {
        Ok(reset) => {
            let progress = match &request.phase {
                Some(phase) => tracker.phase_progress(id, phase).await.ok(),
                None => None,
            };
            (StatusCode::OK, Json(json!({"reset": reset, "progress": progress}))).into_response()
        }
        Err(err) => {
            error!(%id, error = %err, "failed to reset failed items");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}

/// Manually close a tripped breaker.
pub(crate) async fn reset_circuit_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("reset_circuit_breaker");

    let Some(breaker) = state.breaker_manager().find(&service).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no circuit breaker for service {service}")})),
        )
            .into_response();
    };

    match breaker.reset().await {
        Ok(()) => (StatusCode::OK, Json(json!({"service": service, "state": "closed"})))
            .into_response(),
        Err(err) => {
            error!(service, error = %err, "failed to reset circuit breaker");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RetryStatsQuery {
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default = "default_window_hours")]
    window_hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

pub(crate) async fn retry_stats(
    State(state): State<AppState>,
    Query(query): Query<RetryStatsQuery>,
) -> impl IntoResponse {
    match state
        .retry_manager()
        .statistics(query.entity_type.as_deref(), query.window_hours)
        .await
    {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to load retry stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}
