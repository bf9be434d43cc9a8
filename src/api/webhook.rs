use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::store::models::SerpKind;

/// Push notification from the search provider when a batch finishes.
#[derive(Debug, Deserialize)]
pub(crate) struct SerpWebhookPayload {
    batch_id: String,
    #[serde(default)]
    result_set_id: Option<i64>,
    #[serde(default)]
    download_links: Option<Value>,
    #[serde(default)]
    content_type: Option<SerpKind>,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    pipeline_id: Uuid,
    status: &'static str,
}

pub(crate) async fn serp_batch(
    State(state): State<AppState>,
    Json(payload): Json<SerpWebhookPayload>,
) -> impl IntoResponse {
    info!(batch_id = %payload.batch_id, "serp webhook received");

    match state
        .pipeline_service()
        .start_webhook_run(
            payload.batch_id,
            payload.result_set_id,
            payload.download_links,
            payload.content_type,
        )
        .await
    {
        Ok(pipeline_id) => (
            StatusCode::ACCEPTED,
            Json(WebhookResponse {
                pipeline_id,
                status: "accepted",
            }),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to start webhook pipeline");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": format!("{err:#}")})),
            )
                .into_response()
        }
    }
}
