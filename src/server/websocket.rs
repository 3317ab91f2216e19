//! WebSocket upgrade and per-connection read/write loop (spec §4.H, §6
//! "WebSocket frames").
//!
//! One task per connection races inbound socket reads against outbound
//! frames queued by the agent (state updates, MCP view changes, task
//! updates, RPC responses), following the teacher's `handle_ws_events`
//! `tokio::select!` shape in `adapters/mcp/events_http.rs`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::core::rpc::OutboundFrame;
use crate::server::ServerState;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path((class, name)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, class, name))
}

async fn handle_connection(mut socket: WebSocket, state: Arc<ServerState>, class: String, name: String) {
    if class != state.registry.class_name() {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let agent = match state.registry.get_or_create(&name).await {
        Ok(agent) => agent,
        Err(err) => {
            tracing::warn!(%err, %name, "failed to materialize agent for websocket connection");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (connection_id, mut outbound) = match agent.accept_connection().await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(%err, %name, "onConnect sequence failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        agent.handle_inbound(connection_id, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    agent.drop_connection(connection_id);
}

async fn send_frame(socket: &mut WebSocket, frame: &OutboundFrame) -> Result<(), axum::Error> {
    let json = frame.to_json_string().unwrap_or_default();
    socket.send(Message::Text(json)).await
}
