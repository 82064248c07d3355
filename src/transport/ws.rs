// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket handler: frames newline-JSON client messages and
//! hands each line straight to the [`Dispatcher`]. Grounded on the reference
//! repo's `ws::ws_handler`/`handle_ws` split-socket shape, stripped of the
//! bridge/session-entry plumbing this proxy doesn't have.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::dispatch::Dispatcher;
use crate::notify::Notifier;

/// `GET /ws` — upgrade to the client protocol (spec §4.8).
pub async fn ws_handler<N: Notifier + 'static>(
    State(dispatcher): State<Arc<Dispatcher<N>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ip = client_ip(&dispatcher, &headers, addr);
    ws.on_upgrade(move |socket| handle_ws(socket, dispatcher, ip))
}

/// Honor `X-Real-IP` / `X-Forwarded-For` when `TRUST_PROXY` is set; otherwise
/// use the observed peer address.
fn client_ip<N: Notifier + 'static>(dispatcher: &Dispatcher<N>, headers: &HeaderMap, peer: SocketAddr) -> String {
    if dispatcher.config().trust_proxy {
        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return real_ip.trim().to_owned();
        }
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                return first.trim().to_owned();
            }
        }
    }
    peer.ip().to_string()
}

async fn handle_ws<N: Notifier + 'static>(socket: WebSocket, dispatcher: Arc<Dispatcher<N>>, ip: String) {
    let client_id: u64 = rand::random();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outgoing = reply_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.handle_client_message(client_id, &ip, &reply_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // The client may still want to `resume` later; only detach, never close
    // the session outright (that's `disconnect`'s job, handled in-dispatch).
    dispatcher.forget_transport(client_id).await;
}
