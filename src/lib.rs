// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tnbridge: a stateful proxy bridging websocket/mobile clients to legacy
//! telnet MUD servers, with resume-after-disconnect, telnet option
//! negotiation, trigger-driven alert pushes, and background resync pushes.

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod push;
pub mod session;
pub mod telnet;
pub mod transport;
pub mod trigger;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::dispatch::Dispatcher;
use crate::notify::NullNotifier;
use crate::session::manager::SessionManager;
use crate::transport::build_router;

/// Run the proxy until shutdown.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let config = Arc::new(config);

    let manager = SessionManager::new(Arc::clone(&config), shutdown.clone());
    manager.spawn_cleanup_task();

    let dispatcher = Dispatcher::new(Arc::clone(&config), Arc::clone(&manager), Arc::new(NullNotifier));
    dispatcher.spawn_trigger_cleanup_task();

    let router = build_router(dispatcher, &config.allowed_origins).into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!("tnbridge listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
