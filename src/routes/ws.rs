use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::app_state::AppState;
use crate::models::progress::ChannelMessage;
use crate::services::broadcast::ProgressHub;

/// GET /ws — Subscribe to live progress events for all jobs.
pub async fn progress_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.progress))
}

async fn handle_socket(socket: WebSocket, hub: ProgressHub) {
    let mut events = hub.subscribe();
    let connected = hub.subscriber_count();
    metrics::gauge!("progress_subscribers").set(connected as f64);
    tracing::info!(subscribers = connected, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    let greeting = ChannelMessage::Status {
        message: "Connected to server".to_string(),
    };

    if send(&mut sender, &greeting).await {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if !send(&mut sender, &ChannelMessage::UpdateImage(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Client lagging, progress events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    drop(events);
    let remaining = hub.subscriber_count();
    metrics::gauge!("progress_subscribers").set(remaining as f64);
    tracing::info!(subscribers = remaining, "Client disconnected");
}

/// Returns `false` once the client can no longer be written to.
async fn send(sender: &mut SplitSink<WebSocket, Message>, message: &ChannelMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode progress message");
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
