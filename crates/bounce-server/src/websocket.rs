use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use tokio::{sync::mpsc, time};
use tokio_stream::StreamExt;

use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(25);

pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One dispatch task per socket: inbound frames are handled strictly in
/// arrival order, outbound frames arrive over the peer's channel from the
/// registry. Either side failing tears the connection down.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = state.registry.add_connection(tx).await;
    tracing::info!("🔌 peer connected ({id})");

    let mut ping_interval = time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            tracing::error!("failed to send frame to peer {id}");
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.handle_frame(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong frames are not part of the protocol
                    Some(Err(err)) => {
                        tracing::debug!("websocket error from peer {id}: {err}");
                        break;
                    }
                }
            }
        }
    }

    state.registry.remove_connection(id).await;
    tracing::info!("🔌 peer disconnected ({id})");
}
