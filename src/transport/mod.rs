// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream transport: a thin axum WebSocket binding over the dispatcher
//! (spec §4.8). Owns socket framing and CORS only — no session or protocol
//! logic lives here.

pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::notify::Notifier;

/// Build the axum `Router` exposing the client WebSocket endpoint.
pub fn build_router<N: Notifier + 'static>(dispatcher: Arc<Dispatcher<N>>, allowed_origins: &str) -> Router {
    let cors = build_cors(allowed_origins);

    Router::new()
        .route("/ws", get(ws::ws_handler::<N>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

fn build_cors(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }

    let origins: Vec<_> = allowed_origins.split(',').filter_map(|origin| origin.trim().parse().ok()).collect();
    CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
}
