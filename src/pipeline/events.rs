/// Per-run event hub backing the `pipeline_{id}` websocket topic.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// One frame pushed to websocket subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub pipeline_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

pub struct EventHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<PipelineEvent>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, run_id: Uuid) -> broadcast::Receiver<PipelineEvent> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Human-readable status line.
    pub async fn status(&self, run_id: Uuid, message: impl Into<String>) {
        self.publish(PipelineEvent {
            event_type: "status".to_string(),
            pipeline_id: run_id,
            message: Some(message.into()),
            event: None,
            data: None,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Structured progress event (phase transitions, batch progress).
    pub async fn progress(&self, run_id: Uuid, event: impl Into<String>, data: Value) {
        self.publish(PipelineEvent {
            event_type: "progress".to_string(),
            pipeline_id: run_id,
            message: None,
            event: Some(event.into()),
            data: Some(data),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn publish(&self, event: PipelineEvent) {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(&event.pipeline_id) {
            // Lagging or absent subscribers are fine; events are advisory.
            let _ = sender.send(event);
        }
    }

    /// Drop the channel once a run is finished and clients have gone away.
    pub async fn forget(&self, run_id: Uuid) {
        let mut channels = self.channels.lock().await;
        if let Some(sender) = channels.get(&run_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&run_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = EventHub::new();
        let run_id = Uuid::new_v4();
        let mut receiver = hub.subscribe(run_id).await;

        hub.status(run_id, "Pipeline started").await;

        let event = receiver.recv().await.expect("event should arrive");
        assert_eq!(event.event_type, "status");
        assert_eq!(event.message.as_deref(), Some("Pipeline started"));
        assert_eq!(event.pipeline_id, run_id);
    }

    #[tokio::test]
    async fn progress_events_carry_data() {
        let hub = EventHub::new();
        let run_id = Uuid::new_v4();
        let mut receiver = hub.subscribe(run_id).await;

        hub.progress(run_id, "serp_batch_progress", json!({"results_count": 3}))
            .await;

        let event = receiver.recv().await.expect("event should arrive");
        assert_eq!(event.event.as_deref(), Some("serp_batch_progress"));
        assert_eq!(event.data.unwrap()["results_count"], 3);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_noop() {
        let hub = EventHub::new();
        hub.status(Uuid::new_v4(), "nobody listening").await;
    }

    #[tokio::test]
    async fn forget_removes_idle_channels() {
        let hub = EventHub::new();
        let run_id = Uuid::new_v4();
        {
            let _receiver = hub.subscribe(run_id).await;
            hub.forget(run_id).await;
            // Still subscribed: channel must survive.
            assert!(hub.channels.lock().await.contains_key(&run_id));
        }
        hub.forget(run_id).await;
        assert!(!hub.channels.lock().await.contains_key(&run_id));
    }
}
