use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;

/// Upgrade to the `pipeline_{id}` event stream. Each frame is one JSON
/// `{type, pipeline_id, message|event|data, timestamp}` object.
pub(crate) async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| stream_events(socket, state, id))
}

async fn stream_events(mut socket: WebSocket, state: AppState, run_id: Uuid) {
    let events = state.events();
    let mut receiver = events.subscribe(run_id).await;
    debug!(%run_id, "websocket subscriber connected");

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(frame) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Lagged subscribers skip ahead; a closed channel ends
                    // the stream.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    debug!(%run_id, "websocket subscriber disconnected");
    events.forget(run_id).await;
}
