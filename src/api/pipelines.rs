use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::pipeline::config::PipelineConfig;
use crate::store::models::PipelineMode;

#[derive(Debug, Serialize)]
struct StartResponse {
    pipeline_id: Uuid,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(config): Json<PipelineConfig>,
) -> impl IntoResponse {
    state.telemetry().metrics().pipelines_started.inc();

    match state
        .pipeline_service()
        .start(config, PipelineMode::Manual)
        .await
    {
        Ok(pipeline_id) => {
            info!(%pipeline_id, "pipeline accepted");
            (
                StatusCode::ACCEPTED,
                Json(StartResponse {
                    pipeline_id,
                    status: "accepted",
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to start pipeline");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}

pub(crate) async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.pipeline_service().status(id).await {
        Ok(Some(status)) => (StatusCode::OK, Json(status)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("pipeline {id} not found")),
        Err(err) => {
            error!(%id, error = %err, "failed to load pipeline status");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    10
}

pub(crate) async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let limit = query.limit.clamp(1, 100);
    match state.pipeline_service().recent(limit).await {
        Ok(runs) => (StatusCode::OK, Json(runs)).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list recent pipelines");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}

pub(crate) async fn resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.pipeline_service().resume(id).await {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(StartResponse {
                pipeline_id: id,
                status: "resuming",
            }),
        )
            .into_response(),
        Err(err) => {
            error!(%id, error = %err, "failed to resume pipeline");
            error_response(StatusCode::NOT_FOUND, format!("{err:#}"))
        }
    }
}

pub(crate) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.pipeline_service().cancel(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(StartResponse {
                pipeline_id: id,
                status: "cancelled",
            }),
        )
            .into_response(),
        Ok(false) => error_response(
            StatusCode::CONFLICT,
            format!("pipeline {id} is not running"),
        ),
        Err(err) => {
            error!(%id, error = %err, "failed to cancel pipeline");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: u64,
}

/// Admin-only: clears run history.
pub(crate) async fn delete_all(State(state): State<AppState>) -> impl IntoResponse {
    state.telemetry().record_admin_invocation("clear_pipelines");
    match state.pipeline_service().clear_all().await {
        Ok(deleted) => (StatusCode::OK, Json(DeleteResponse { deleted })).into_response(),
        Err(err) => {
            error!(error = %err, "failed to clear pipelines");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}
