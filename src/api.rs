pub(crate) mod admin;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod pipelines;
pub(crate) mod webhook;
pub(crate) mod ws;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/pipelines", post(pipelines::create))
        .route("/pipelines", delete(pipelines::delete_all))
        .route("/pipelines/recent", get(pipelines::recent))
        .route("/pipelines/{id}", get(pipelines::get))
        .route("/pipelines/{id}/resume", post(pipelines::resume))
        .route("/pipelines/{id}/cancel", post(pipelines::cancel))
        .route("/pipelines/{id}/ws", get(ws::subscribe))
        .route("/webhooks/serp", post(webhook::serp_batch))
        .route("/admin/queue/stats", get(admin::queue_stats))
        .route(
            "/admin/queue/retry-dead-letter",
            post(admin::retry_dead_letter),
        )
        .route("/admin/circuit-breakers", get(admin::circuit_breakers))
        .route(
            "/admin/circuit-breakers/{service}/reset",
            post(admin::reset_circuit_breaker),
        )
        .route(
            "/admin/pipelines/{id}/reset-failed",
            post(admin::reset_failed_items),
        )
        .route("/admin/retry-stats", get(admin::retry_stats))
        .with_state(state)
}
