//! WebSocket endpoint for change notifications. The client's first text
//! frame must be its bearer token; once verified the connection is
//! registered and receives JSON-encoded notification frames until it
//! closes.

use crate::api::handlers::AppState;
use crate::api::token;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // first frame binds the connection to a principal
    let principal = loop {
        match stream.next().await {
            Some(Ok(Message::Text(raw))) => {
                match token::verify(raw.trim(), &state.jwt_secret) {
                    Ok(principal) => break principal,
                    Err(err) => {
                        log::warn!("websocket rejected: {err}");
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.registry.register(principal, tx);
    log::info!("websocket connected: {connection_id}");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // inbound frames after the handshake are ignored
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    state.registry.unregister(connection_id);
    log::info!("websocket disconnected: {connection_id}");
}
