use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward events addressed to this courier.
    pub courier_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.courier_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, courier_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let events = BroadcastStream::new(state.events_tx.subscribe()).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            // lagged receivers skip what they missed
            Err(_) => return futures::future::ready(None),
        };
        let wanted = match courier_id {
            Some(id) => event.courier_id() == Some(id),
            None => true,
        };
        futures::future::ready(wanted.then_some(event))
    });

    info!(courier_id = ?courier_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(courier_id = ?courier_id, "websocket client disconnected");
}
