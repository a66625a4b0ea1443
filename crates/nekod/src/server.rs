use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::debug_api;
use crate::onebot::OutboundCommand;
use crate::router;
use crate::AppState;

const OUTBOUND_QUEUE_SIZE: usize = 64;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(debug_api::root))
        .route("/ws", get(gateway_ws))
        .route("/test-chat", get(debug_api::test_chat))
        .route("/test-draw", get(debug_api::test_draw))
        .with_state(state)
}

async fn gateway_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_gateway(socket, state))
}

/// Owns one reverse-WebSocket session with the gateway. Every inbound text
/// frame is routed on its own task; completions carry no ordering guarantee
/// relative to each other.
async fn handle_gateway(socket: WebSocket, state: Arc<AppState>) {
    info!("gateway connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundCommand>(OUTBOUND_QUEUE_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(command) = out_rx.recv().await {
            let frame = match serde_json::to_string(&command) {
                Ok(v) => v,
                Err(err) => {
                    warn!("serialize outbound command failed: {err}");
                    continue;
                }
            };
            if let Err(err) = ws_sender.send(Message::Text(frame)).await {
                warn!("gateway send failed: {err}");
                break;
            }
        }
    });

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let state = state.clone();
                    let out = out_tx.clone();
                    tasks.spawn(async move {
                        router::handle_event(state, &text, out).await;
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("gateway socket error: {err}");
                    break;
                }
            },
            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = finished {
                    warn!("event task failed: {err}");
                }
            }
        }
    }

    // The socket is gone; in-flight exchanges still run to completion
    // before the session is torn down.
    while let Some(finished) = tasks.join_next().await {
        if let Err(err) = finished {
            warn!("event task failed: {err}");
        }
    }
    drop(out_tx);
    let _ = writer.await;
    info!("gateway disconnected");
}
